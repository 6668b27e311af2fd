//! Disk-or-network download coordination.
//!
//! The download cache checks the disk cache first, then fetches over the
//! network with per-URL in-flight de-duplication: the first requester owns
//! the flight, every concurrent requester for the same URL awaits the same
//! completion instead of issuing a second request.

mod http;
mod retry;

pub use http::ReqwestTransport;
pub use retry::{RetryPolicy, with_retry};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{DownloadResult, TaskParameter};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::HttpTransport;
use crate::infrastructure::disk_cache::DiskCache;

type FlightOutcome = LoadResult<Bytes>;

/// Coordinates "disk-cache-or-network" fetches for URL sources.
pub struct DownloadCache {
    disk_cache: Arc<DiskCache>,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    inflight: Arc<Mutex<HashMap<String, broadcast::Sender<FlightOutcome>>>>,
}

impl std::fmt::Debug for DownloadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCache")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DownloadCache {
    /// Creates a download cache over the given disk cache and transport.
    #[must_use]
    pub fn new(
        disk_cache: Arc<DiskCache>,
        transport: Arc<dyn HttpTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            disk_cache,
            transport,
            retry,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the payload for `url`, from the disk cache when present,
    /// downloading (and persisting) it otherwise.
    ///
    /// The disk lookup uses the request's base cache key (the custom key
    /// override when set, the URL otherwise). On a network fetch the bytes
    /// are queued for disk persistence without blocking the caller.
    ///
    /// # Errors
    /// Returns [`LoadError::Cancelled`] when `signal` was raised while
    /// waiting, or the (possibly aggregated) transport failure.
    pub async fn download_and_cache_if_needed(
        &self,
        url: &str,
        parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<DownloadResult> {
        let key = parameters
            .custom_cache_key
            .clone()
            .unwrap_or_else(|| url.to_string());

        if let Some(bytes) = self.disk_cache.get_bytes(&key).await {
            trace!(url = %url, "download served from disk cache");
            let file_path = self.disk_cache.file_path(&key).await;
            return Ok(DownloadResult {
                bytes,
                retrieved_from_disk_cache: true,
                file_path,
            });
        }

        if signal.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let bytes = self
            .fetch_deduplicated(url, &key, parameters.cache_duration, signal)
            .await?;
        Ok(DownloadResult {
            bytes,
            retrieved_from_disk_cache: false,
            file_path: None,
        })
    }

    /// Joins the in-flight fetch for `url`, starting one when none exists.
    ///
    /// The flight itself runs detached from any single requester's
    /// cancellation: followers depend on it, and its duration is bounded by
    /// the transport timeouts. A cancelled requester stops waiting
    /// immediately; the shared flight completes for the others.
    async fn fetch_deduplicated(
        &self,
        url: &str,
        key: &str,
        ttl: Duration,
        signal: &CancellationSignal,
    ) -> LoadResult<Bytes> {
        let mut receiver = {
            let mut inflight = self.inflight.lock();
            if let Some(sender) = inflight.get(url) {
                trace!(url = %url, "joining in-flight download");
                sender.subscribe()
            } else {
                let (sender, receiver) = broadcast::channel(1);
                inflight.insert(url.to_string(), sender.clone());
                self.spawn_flight(url.to_string(), key.to_string(), ttl, sender);
                receiver
            }
        };

        tokio::select! {
            outcome = receiver.recv() => match outcome {
                Ok(result) => result,
                Err(err) => {
                    warn!(url = %url, error = %err, "in-flight download dropped its waiters");
                    Err(LoadError::TransientIo("shared download aborted".to_string()))
                }
            },
            () = signal.cancelled() => Err(LoadError::Cancelled),
        }
    }

    fn spawn_flight(
        &self,
        url: String,
        key: String,
        ttl: Duration,
        sender: broadcast::Sender<FlightOutcome>,
    ) {
        let transport = self.transport.clone();
        let disk_cache = self.disk_cache.clone();
        let inflight = self.inflight.clone();
        let retry = self.retry;

        tokio::spawn(async move {
            debug!(url = %url, "starting download");
            let detached = CancellationSignal::new();
            let result = with_retry(retry, &detached, |_| {
                let transport = transport.clone();
                let url = url.clone();
                async move { transport.fetch(&url).await.map(|response| response.bytes) }
            })
            .await;

            match &result {
                Ok(bytes) => {
                    debug!(url = %url, size = bytes.len(), "download complete");
                    disk_cache
                        .add_to_saving_queue_if_not_exists(&key, bytes.clone(), ttl)
                        .await;
                }
                Err(err) => {
                    debug!(url = %url, error = %err, "download failed");
                }
            }

            inflight.lock().remove(&url);
            let _ = sender.send(result);
        });
    }
}
