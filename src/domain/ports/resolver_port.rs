//! Port for turning a source identifier into a byte stream plus metadata.

use tokio::io::AsyncRead;

use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{ImageInformation, LoadingResult, TaskParameter};
use crate::domain::errors::LoadResult;

/// What a resolver hands back: a byte stream and where it came from.
pub struct ResolvedData {
    /// The payload reader. The wrapping resolver guarantees this is backed
    /// by memory (and therefore seekable) before decoding sees it.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Where the payload was retrieved from.
    pub result: LoadingResult,
    /// Metadata accumulated while resolving.
    pub info: ImageInformation,
}

impl std::fmt::Debug for ResolvedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedData")
            .field("result", &self.result)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Pluggable strategy converting a source identifier into a byte stream.
///
/// Implementations must be thread-safe; one resolver instance serves many
/// concurrent tasks.
#[async_trait::async_trait]
pub trait DataResolver: Send + Sync {
    /// Resolves `identifier` into a byte stream plus metadata.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::NotFound`] when the
    /// resource does not exist, a transport error for network sources, or
    /// [`crate::domain::errors::LoadError::Cancelled`] when `signal` was
    /// raised.
    async fn resolve(
        &self,
        identifier: &str,
        parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<ResolvedData>;
}
