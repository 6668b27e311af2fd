//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

const APP_NAME: &str = "pixcache";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "pixcache";

/// Configuration for the whole loading pipeline.
///
/// Constructed once and handed to
/// [`ImageServiceBuilder`](crate::service::ImageServiceBuilder); there is no
/// ambient global configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum image-loading tasks running concurrently. Cache-hit fast
    /// paths bypass this pool entirely.
    pub max_parallel_tasks: usize,
    /// Maximum concurrent decode+transform jobs. Bounds memory spikes from
    /// simultaneous large-image decodes, independently of the task pool.
    pub max_parallel_decodes: usize,
    /// Memory cache budget in bytes of decoded pixel data. `None` derives
    /// a budget from available process memory, computed once.
    pub memory_cache_budget: Option<u64>,
    /// Maximum total bytes kept in the disk cache.
    pub disk_cache_size: u64,
    /// Disk cache directory. `None` uses the platform cache location.
    pub disk_cache_dir: Option<PathBuf>,
    /// Connect/header timeout for network fetches.
    pub http_header_timeout: Duration,
    /// Read timeout for network fetches.
    pub http_read_timeout: Duration,
    /// Download attempts per request (initial try included).
    pub download_attempts: u32,
    /// Fixed interval between download attempts.
    pub download_retry_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            max_parallel_decodes: 2,
            memory_cache_budget: None,
            disk_cache_size: 200 * 1024 * 1024,
            disk_cache_dir: None,
            http_header_timeout: Duration::from_secs(15),
            http_read_timeout: Duration::from_secs(30),
            download_attempts: 3,
            download_retry_interval: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    /// The disk cache directory: the configured one, or the platform
    /// cache location (with a temp-dir fallback).
    #[must_use]
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.disk_cache_dir
            .clone()
            .unwrap_or_else(default_cache_dir)
    }
}

/// Returns the default cache directory path.
fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
        || std::env::temp_dir().join(APP_NAME).join("cache"),
        |dirs| dirs.cache_dir().join("images"),
    )
}
