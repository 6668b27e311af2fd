//! Resolver for bundled and embedded resources.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{ImageInformation, LoadingResult, SourceKind, TaskParameter};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{DataResolver, ResolvedData};

/// Resolves named resources registered at startup, typically
/// `include_bytes!` tables. Serves both the bundle and embedded source
/// kinds; the kinds stay distinct so cache keys remain faithful to the
/// request.
#[derive(Debug, Default)]
pub struct BundleResolver {
    registry: RwLock<HashMap<String, Bytes>>,
}

impl BundleResolver {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named resource, replacing any previous bytes under the
    /// same name.
    pub fn register(&self, name: impl Into<String>, bytes: impl Into<Bytes>) {
        self.registry.write().insert(name.into(), bytes.into());
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl DataResolver for BundleResolver {
    async fn resolve(
        &self,
        identifier: &str,
        parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<ResolvedData> {
        if signal.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let bytes = self
            .registry
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(identifier.to_string()))?;

        let result = if parameters.source.kind == SourceKind::Embedded {
            LoadingResult::Embedded
        } else {
            LoadingResult::Bundle
        };
        Ok(ResolvedData {
            reader: Box::new(std::io::Cursor::new(bytes)),
            result,
            info: ImageInformation::new(identifier),
        })
    }
}
