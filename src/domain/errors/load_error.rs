//! Failure taxonomy for image loading.

/// Result type for loading operations.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Errors that can occur while loading an image.
///
/// The taxonomy drives the retry loops: only transient failures are
/// retried, cancellation is never reported as an error, and permanent
/// failures surface immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The task was cooperatively cancelled. Never retried, never reported
    /// through the error callback; only the finish callback fires.
    #[error("operation cancelled")]
    Cancelled,

    /// The requested resource does not exist. Permanent.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A timeout or connection-level failure. Retried per policy.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// A non-timeout HTTP client error. Permanent, surfaced immediately.
    #[error("permanent HTTP failure: status {status}")]
    PermanentHttp {
        /// The HTTP status code returned by the server.
        status: u16,
    },

    /// Memory pressure while decoding or transforming. Triggers a memory
    /// cache clear, then one uncharged retry.
    #[error("out of memory while generating image")]
    OutOfMemory,

    /// Undecodable or truncated image data. Not retried.
    #[error("corrupt image data: {0}")]
    CorruptData(String),

    /// A local I/O failure outside the cache layers (cache I/O failures
    /// degrade to misses instead of surfacing here).
    #[error("I/O error: {0}")]
    Io(String),

    /// Every configured download attempt failed; individual failures are
    /// aggregated into one summary.
    #[error("all {attempts} attempts failed: {summary}")]
    AttemptsExhausted {
        /// Number of attempts that were made.
        attempts: u32,
        /// Concatenated per-attempt failure messages.
        summary: String,
    },
}

impl LoadError {
    /// Returns true if the failure is worth another attempt.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Returns true if the failure is a cooperative cancellation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::ConnectionReset => {
                Self::TransientIo(err.to_string())
            }
            std::io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::Io(err.to_string()),
        }
    }
}
