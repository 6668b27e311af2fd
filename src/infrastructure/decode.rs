//! Default decoder built on the `image` crate.

use tracing::trace;

use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::Decoder;

/// Decoder for the formats the `image` crate understands.
///
/// Runs inside a blocking task under the decode gate; see
/// [`Decoder`] for the contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl Decoder for DefaultDecoder {
    fn decode(
        &self,
        bytes: &[u8],
        downsample: Option<(u32, u32)>,
    ) -> LoadResult<image::DynamicImage> {
        let decoded = image::load_from_memory(bytes).map_err(|err| match err {
            image::ImageError::Limits(_) => LoadError::OutOfMemory,
            other => LoadError::CorruptData(other.to_string()),
        })?;

        let Some((width, height)) = downsample else {
            return Ok(decoded);
        };
        if decoded.width() <= width && decoded.height() <= height {
            return Ok(decoded);
        }
        trace!(
            from_width = decoded.width(),
            from_height = decoded.height(),
            to_width = width,
            to_height = height,
            "downsampling"
        );
        // thumbnail() preserves aspect ratio and never upscales.
        Ok(decoded.thumbnail(width, height))
    }
}

/// Cost of a decoded image for the memory cache budget: the RGBA pixel
/// byte size, not the compressed payload size.
#[must_use]
pub fn decoded_cost(image: &image::DynamicImage) -> u64 {
    u64::from(image.width()) * u64::from(image.height()) * 4
}
