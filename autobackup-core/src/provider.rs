/*!
Snapshot providers materialize the current application state into a file.
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{BackupError, Result};

/// Producer of the data to upload
///
/// On success the provider must leave a complete artifact at exactly `path`. Bytes left
/// at `path` after a reported success are uploaded as-is; the uploader does not validate
/// snapshot contents.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn provide(&self, path: &Path) -> Result<()>;
}

#[async_trait]
impl<T: DataProvider + ?Sized> DataProvider for Arc<T> {
    async fn provide(&self, path: &Path) -> Result<()> {
        (**self).provide(path).await
    }
}

/// Provider that snapshots an existing file by copying it
///
/// Useful for backing up a database or state file written by another process.
#[derive(Debug, Clone)]
pub struct FileProvider {
    source: PathBuf,
}

impl FileProvider {
    pub fn new<P: AsRef<Path>>(source: P) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[async_trait]
impl DataProvider for FileProvider {
    async fn provide(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::copy(&self.source, path).await.map_err(|e| {
            BackupError::provider(format!(
                "Failed to copy {} to {}: {e}",
                self.source.display(),
                path.display()
            ))
        })?;
        debug!(source = %self.source.display(), bytes, "Copied snapshot source");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_provider_copies_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("state.db");
        let dest = temp_dir.path().join("staged");
        std::fs::write(&source, b"state").unwrap();
        std::fs::write(&dest, b"").unwrap();

        FileProvider::new(&source).provide(&dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"state");
    }

    #[tokio::test]
    async fn test_missing_source_is_provider_error() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FileProvider::new(temp_dir.path().join("missing"));

        let result = provider.provide(&temp_dir.path().join("staged")).await;
        assert!(matches!(result, Err(BackupError::Provider(_))));
    }
}
