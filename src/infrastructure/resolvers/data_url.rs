//! Resolver for inline `data:` URLs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;

use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{ImageInformation, ImageType, LoadingResult, TaskParameter};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{DataResolver, ResolvedData};

/// Resolves `data:[mediatype][;base64],payload` identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataUrlResolver;

#[async_trait::async_trait]
impl DataResolver for DataUrlResolver {
    async fn resolve(
        &self,
        identifier: &str,
        _parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<ResolvedData> {
        if signal.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let (bytes, image_type) = parse_data_url(identifier)?;
        let mut info = ImageInformation::new(identifier);
        info.image_type = image_type;
        Ok(ResolvedData {
            reader: Box::new(std::io::Cursor::new(bytes)),
            result: LoadingResult::DataUrl,
            info,
        })
    }
}

/// Splits and decodes a data URL into its payload and declared type.
fn parse_data_url(url: &str) -> LoadResult<(Bytes, ImageType)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| LoadError::CorruptData("missing data: scheme".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| LoadError::CorruptData("missing payload separator".to_string()))?;

    let (media_type, is_base64) = meta
        .strip_suffix(";base64")
        .map_or((meta, false), |media| (media, true));

    let bytes = if is_base64 {
        BASE64
            .decode(payload.trim())
            .map(Bytes::from)
            .map_err(|err| LoadError::CorruptData(format!("invalid base64 payload: {err}")))?
    } else {
        Bytes::from(percent_decode(payload))
    };

    Ok((bytes, type_from_media_type(media_type)))
}

fn type_from_media_type(media_type: &str) -> ImageType {
    match media_type.split(';').next().unwrap_or_default().trim() {
        "image/png" => ImageType::Png,
        "image/jpeg" | "image/jpg" => ImageType::Jpeg,
        "image/gif" => ImageType::Gif,
        "image/webp" => ImageType::Webp,
        "image/bmp" => ImageType::Bmp,
        "image/tiff" => ImageType::Tiff,
        "image/svg+xml" => ImageType::Svg,
        _ => ImageType::Unknown,
    }
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]))
        {
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
