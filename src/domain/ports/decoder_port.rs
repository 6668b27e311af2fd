//! Ports for decoding raw bytes and transforming decoded images.

use std::sync::Arc;

use crate::domain::errors::LoadResult;

/// A decoded image, shared cheaply between caches and targets.
pub type ImageHandle = Arc<image::DynamicImage>;

/// Decodes raw bytes into an image.
///
/// Called inside a blocking task under the decode concurrency gate, so
/// implementations are free to be CPU-intensive and synchronous.
pub trait Decoder: Send + Sync {
    /// Decodes `bytes`, downsampling towards `downsample` when given.
    /// Downsampling preserves aspect ratio and never upscales.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::CorruptData`] for
    /// undecodable payloads and
    /// [`crate::domain::errors::LoadError::OutOfMemory`] under memory
    /// pressure.
    fn decode(
        &self,
        bytes: &[u8],
        downsample: Option<(u32, u32)>,
    ) -> LoadResult<image::DynamicImage>;
}

/// A pixel-level transformation applied after decoding.
///
/// Runs in the same blocking task as decoding, under the decode gate.
pub trait Transformation: Send + Sync {
    /// Stable identifier of this transformation including its settings.
    /// Becomes part of the cache key, so two configurations that produce
    /// different pixels must return different keys.
    fn key(&self) -> String;

    /// Transforms the image.
    ///
    /// # Errors
    /// Returns a [`crate::domain::errors::LoadError`] when the
    /// transformation cannot be applied.
    fn transform(&self, image: image::DynamicImage) -> LoadResult<image::DynamicImage>;
}
