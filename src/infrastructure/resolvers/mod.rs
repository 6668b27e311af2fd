//! Data resolver implementations.
//!
//! One resolver per source kind, a composite that dispatches on the
//! request's kind, and a wrapping decorator that guarantees in-memory
//! (seekable) payloads and sniffs unknown image types before decoding.

mod bundle;
mod data_url;
mod file;
mod stream;
mod url;

pub use bundle::BundleResolver;
pub use data_url::DataUrlResolver;
pub use file::FileResolver;
pub use stream::StreamResolver;
pub use url::UrlResolver;

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::trace;

use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{ImageType, SourceKind, TaskParameter};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{DataResolver, ResolvedData};
use crate::infrastructure::download::DownloadCache;

/// Dispatches to the resolver matching the request's source kind.
pub struct CompositeResolver {
    file: FileResolver,
    url: UrlResolver,
    bundle: Arc<BundleResolver>,
    stream: StreamResolver,
    data_url: DataUrlResolver,
}

impl CompositeResolver {
    /// Builds the composite over the shared download cache and bundle
    /// registry.
    #[must_use]
    pub fn new(download_cache: Arc<DownloadCache>, bundle: Arc<BundleResolver>) -> Self {
        Self {
            file: FileResolver,
            url: UrlResolver::new(download_cache),
            bundle,
            stream: StreamResolver,
            data_url: DataUrlResolver,
        }
    }
}

#[async_trait::async_trait]
impl DataResolver for CompositeResolver {
    async fn resolve(
        &self,
        identifier: &str,
        parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<ResolvedData> {
        match parameters.source.kind {
            SourceKind::File => self.file.resolve(identifier, parameters, signal).await,
            SourceKind::Url => self.url.resolve(identifier, parameters, signal).await,
            SourceKind::Bundle | SourceKind::Embedded => {
                self.bundle.resolve(identifier, parameters, signal).await
            }
            SourceKind::Stream => self.stream.resolve(identifier, parameters, signal).await,
            SourceKind::DataUrl => self.data_url.resolve(identifier, parameters, signal).await,
        }
    }
}

/// Decorator guaranteeing a seekable, in-memory payload with a known
/// image type.
///
/// Buffers the inner resolver's stream into memory when it is not already
/// memory-backed, then sniffs the first bytes against known format
/// signatures when the type is still unknown.
pub struct WrappedResolver {
    inner: Arc<dyn DataResolver>,
}

impl WrappedResolver {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn DataResolver>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl DataResolver for WrappedResolver {
    async fn resolve(
        &self,
        identifier: &str,
        parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<ResolvedData> {
        let mut data = self.inner.resolve(identifier, parameters, signal).await?;

        if signal.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let mut buffer = Vec::new();
        data.reader
            .read_to_end(&mut buffer)
            .await
            .map_err(LoadError::from)?;
        let bytes = Bytes::from(buffer);

        if data.info.image_type == ImageType::Unknown {
            data.info.image_type = ImageType::sniff(&bytes);
            trace!(identifier = %identifier, image_type = %data.info.image_type, "sniffed image type");
        }

        Ok(ResolvedData {
            reader: Box::new(std::io::Cursor::new(bytes)),
            result: data.result,
            info: data.info,
        })
    }
}
