//! Resolver for local filesystem paths.

use tokio::fs;

use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{ImageInformation, LoadingResult, TaskParameter};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{DataResolver, ResolvedData};

/// Resolves an identifier as a path on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileResolver;

#[async_trait::async_trait]
impl DataResolver for FileResolver {
    async fn resolve(
        &self,
        identifier: &str,
        _parameters: &TaskParameter,
        signal: &CancellationSignal,
    ) -> LoadResult<ResolvedData> {
        if signal.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let file = fs::File::open(identifier).await.map_err(LoadError::from)?;
        let info = ImageInformation::new(identifier).with_file_path(identifier);
        Ok(ResolvedData {
            reader: Box::new(file),
            result: LoadingResult::Disk,
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ImageSource;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_resolves_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"contents").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let parameters = TaskParameter::builder(ImageSource::file(&path)).build();
        let mut data = FileResolver
            .resolve(&path, &parameters, &CancellationSignal::new())
            .await
            .unwrap();

        assert_eq!(data.result, LoadingResult::Disk);
        assert_eq!(data.info.file_path.as_deref().unwrap().to_str().unwrap(), path);
        let mut buffer = Vec::new();
        data.reader.read_to_end(&mut buffer).await.unwrap();
        assert_eq!(buffer, b"contents");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let parameters = TaskParameter::builder(ImageSource::file("/no/such/file.png")).build();
        let result = FileResolver
            .resolve("/no/such/file.png", &parameters, &CancellationSignal::new())
            .await;
        assert!(matches!(result, Err(LoadError::NotFound(_))));
    }
}
