//! Image metadata and format detection.

use std::path::PathBuf;

use super::cache_key::base_key;

/// Detected image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageType {
    /// Portable Network Graphics.
    Png,
    /// JPEG.
    Jpeg,
    /// GIF (87a or 89a).
    Gif,
    /// WebP inside a RIFF container.
    Webp,
    /// Windows bitmap.
    Bmp,
    /// TIFF, either byte order.
    Tiff,
    /// SVG markup.
    Svg,
    /// Format not (yet) determined.
    #[default]
    Unknown,
}

impl ImageType {
    /// Sniffs the format from the first bytes of a payload.
    ///
    /// Returns [`ImageType::Unknown`] when no known signature matches.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Self::Png;
        }
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Self::Jpeg;
        }
        if bytes.starts_with(b"GIF8") {
            return Self::Gif;
        }
        if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            return Self::Webp;
        }
        if bytes.starts_with(b"BM") {
            return Self::Bmp;
        }
        if bytes.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || bytes.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
            return Self::Tiff;
        }
        let head = bytes.iter().position(|b| !b.is_ascii_whitespace()).map_or(&b""[..], |i| &bytes[i..]);
        if head.starts_with(b"<svg") || head.starts_with(b"<?xml") {
            return Self::Svg;
        }
        Self::Unknown
    }

    /// Conventional file extension for the format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png | Self::Unknown => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Svg => "svg",
        }
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Gif => write!(f, "gif"),
            Self::Webp => write!(f, "webp"),
            Self::Bmp => write!(f, "bmp"),
            Self::Tiff => write!(f, "tiff"),
            Self::Svg => write!(f, "svg"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metadata describing a resolved or decoded image.
#[derive(Debug, Clone, Default)]
pub struct ImageInformation {
    /// Pixel width of the original image, if known.
    pub original_width: Option<u32>,
    /// Pixel height of the original image, if known.
    pub original_height: Option<u32>,
    /// Pixel width after downsampling/transformation, if known.
    pub current_width: Option<u32>,
    /// Pixel height after downsampling/transformation, if known.
    pub current_height: Option<u32>,
    /// Detected image format.
    pub image_type: ImageType,
    /// The source path or identifier the request named.
    pub path: Option<String>,
    /// The resolved on-disk file backing the image, if any.
    pub file_path: Option<PathBuf>,
    /// The full cache key of the request, if one could be computed.
    pub cache_key: Option<String>,
}

impl ImageInformation {
    /// Creates empty metadata for a source path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the resolved file path.
    #[must_use]
    pub fn with_file_path(mut self, file_path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// Sets the full cache key.
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Records the original pixel dimensions, also initializing the current
    /// dimensions when unset.
    pub fn set_original_dimensions(&mut self, width: u32, height: u32) {
        self.original_width = Some(width);
        self.original_height = Some(height);
        if self.current_width.is_none() {
            self.current_width = Some(width);
            self.current_height = Some(height);
        }
    }

    /// Records the dimensions after downsampling/transformation.
    pub fn set_current_dimensions(&mut self, width: u32, height: u32) {
        self.current_width = Some(width);
        self.current_height = Some(height);
    }

    /// The base key: the cache key stripped of transformation suffixes.
    /// Used to invalidate every transformed variant of one source.
    #[must_use]
    pub fn base_key(&self) -> Option<&str> {
        self.cache_key.as_deref().map(base_key)
    }
}
