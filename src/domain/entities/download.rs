//! Results of resolving and downloading image data.

use std::path::PathBuf;

use bytes::Bytes;

/// Where a successfully loaded image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingResult {
    /// Served from the in-memory LRU cache.
    MemoryCache,
    /// Served from the persistent disk cache.
    DiskCache,
    /// Downloaded from the network.
    Internet,
    /// Read from a local file.
    Disk,
    /// Read from the application bundle registry.
    Bundle,
    /// Read from a compiled-in embedded resource.
    Embedded,
    /// Read from a caller-supplied raw stream.
    Stream,
    /// Decoded from an inline data URL.
    DataUrl,
}

impl std::fmt::Display for LoadingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk-cache"),
            Self::Internet => write!(f, "network"),
            Self::Disk => write!(f, "file"),
            Self::Bundle => write!(f, "bundle"),
            Self::Embedded => write!(f, "embedded"),
            Self::Stream => write!(f, "stream"),
            Self::DataUrl => write!(f, "data-url"),
        }
    }
}

/// Outcome of a [`DownloadCache`](crate::infrastructure::download::DownloadCache)
/// fetch: the payload plus where it was retrieved from.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// The raw (undecoded) payload.
    pub bytes: Bytes,
    /// True when the payload was served from the disk cache rather than
    /// fetched over the network.
    pub retrieved_from_disk_cache: bool,
    /// The disk cache file backing the payload, when one exists.
    pub file_path: Option<PathBuf>,
}

impl DownloadResult {
    /// The [`LoadingResult`] this download corresponds to.
    #[must_use]
    pub const fn loading_result(&self) -> LoadingResult {
        if self.retrieved_from_disk_cache {
            LoadingResult::DiskCache
        } else {
            LoadingResult::Internet
        }
    }
}
