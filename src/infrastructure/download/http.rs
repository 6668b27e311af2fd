//! HTTP transport adapter built on `reqwest`.

use std::time::Duration;

use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{HttpTransport, TransportResponse};

/// Transport backed by a shared `reqwest` client.
///
/// Timeouts are enforced here: the connect timeout covers the
/// connection/header phase, the read timeout covers the body.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the transport with the given timeouts.
    ///
    /// # Errors
    /// Returns [`LoadError::Io`] when the underlying client cannot be
    /// constructed.
    pub fn new(header_timeout: Duration, read_timeout: Duration) -> LoadResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(header_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|err| LoadError::Io(format!("failed to create HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(&self, url: &str) -> LoadResult<TransportResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| classify_request_error(&err))?;

        let status = response.status().as_u16();
        if let Some(err) = classify_status(status, url) {
            return Err(err);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        let bytes = response
            .bytes()
            .await
            .map_err(|err| classify_request_error(&err))?;

        Ok(TransportResponse { bytes, content_type })
    }
}

fn classify_request_error(err: &reqwest::Error) -> LoadError {
    if err.is_timeout() {
        LoadError::TransientIo(format!("request timed out: {err}"))
    } else if err.is_connect() {
        LoadError::TransientIo(format!("connection failed: {err}"))
    } else {
        LoadError::TransientIo(format!("request failed: {err}"))
    }
}

/// Maps an HTTP status onto the error taxonomy; `None` means success.
fn classify_status(status: u16, url: &str) -> Option<LoadError> {
    match status {
        200..=299 => None,
        404 | 410 => Some(LoadError::NotFound(url.to_string())),
        // Timeout-like client statuses stay retriable.
        408 | 429 => Some(LoadError::TransientIo(format!("HTTP {status}"))),
        400..=499 => Some(LoadError::PermanentHttp { status }),
        _ => Some(LoadError::TransientIo(format!("HTTP {status}"))),
    }
}
