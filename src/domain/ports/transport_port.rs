//! Port for the HTTP layer behind the download cache.

use bytes::Bytes;

use crate::domain::errors::LoadResult;

/// A successful HTTP response body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// The response body.
    pub bytes: Bytes,
    /// The `Content-Type` header value, when present.
    pub content_type: Option<String>,
}

/// Performs a single HTTP fetch.
///
/// Adapters map their failure modes onto the
/// [`LoadError`](crate::domain::errors::LoadError) taxonomy: timeouts and
/// connection failures become `TransientIo`, non-timeout 4xx becomes
/// `PermanentHttp`, 404 becomes `NotFound`. Timeouts are enforced here, not
/// by the scheduler.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    /// Fetches `url` once. Retrying is the caller's concern.
    ///
    /// # Errors
    /// See the trait-level mapping.
    async fn fetch(&self, url: &str) -> LoadResult<TransportResponse>;
}
