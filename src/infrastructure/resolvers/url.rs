//! Resolver for URL sources, delegating to the download cache.

use std::sync::Arc;

use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{ImageInformation, TaskParameter};
use crate::domain::errors::LoadResult;
use crate::domain::ports::{DataResolver, ResolvedData};
use crate::infrastructure::download::DownloadCache;

/// Resolves an identifier as a URL through the download cache, which
/// handles disk-or-network coordination, in-flight de-duplication, and
/// retry.
pub struct UrlResolver {
    download_cache: Arc<DownloadCache>,
}

impl UrlResolver {
    /// Creates the resolver over the shared download cache.
    #[must_use]
    pub fn new(download_cache: Arc<DownloadCache>) -> Self {
        Self { download_cache }
    }
}

#[async_trait::async_trait]
impl DataResolver for UrlResolver {
    async fn resolve(
        &self,
        identifier: &str,
        parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<ResolvedData> {
        let download = self
            .download_cache
            .download_and_cache_if_needed(identifier, parameters, signal)
            .await?;

        let mut info = ImageInformation::new(identifier);
        info.file_path.clone_from(&download.file_path);
        let result = download.loading_result();
        Ok(ResolvedData {
            reader: Box::new(std::io::Cursor::new(download.bytes)),
            result,
            info,
        })
    }
}
