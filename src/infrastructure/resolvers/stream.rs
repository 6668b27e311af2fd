//! Resolver for caller-supplied raw streams.

use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{ImageInformation, LoadingResult, TaskParameter};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{DataResolver, ResolvedData};

/// Hands out the raw stream attached to the request parameters.
///
/// A stream is single-use: it is taken out of the parameters on the first
/// resolve, so a retry after the stream was partially consumed reports the
/// source as gone rather than decoding garbage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamResolver;

#[async_trait::async_trait]
impl DataResolver for StreamResolver {
    async fn resolve(
        &self,
        identifier: &str,
        parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<ResolvedData> {
        if signal.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let reader = parameters.take_raw_stream().ok_or_else(|| {
            LoadError::NotFound(format!("no raw stream attached for '{identifier}'"))
        })?;
        Ok(ResolvedData {
            reader,
            result: LoadingResult::Stream,
            info: ImageInformation::new(identifier),
        })
    }
}
