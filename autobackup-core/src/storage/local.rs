/*!
Local filesystem storage backend.
*/

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::StorageClient;
use crate::{BackupError, Result};

/// Local filesystem storage backend
///
/// Each upload replaces the file at the destination path. The stream is first written to
/// a sibling temp file and renamed into place, so readers never see a partial upload.
/// Parent directories are created as needed.
///
/// # Example
/// ```rust,no_run
/// use autobackup_core::storage::LocalFileStorage;
///
/// let storage = LocalFileStorage::new("/var/backups/app/latest.gz");
/// assert_eq!(storage.to_string(), "local:/var/backups/app/latest.gz");
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    path: PathBuf,
}

impl LocalFileStorage {
    /// Create a backend that writes uploads to `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl fmt::Display for LocalFileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local:{}", self.path.display())
    }
}

#[async_trait]
impl StorageClient for LocalFileStorage {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let dir = self.parent_dir();
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            BackupError::storage(format!("Failed to create directory {}: {e}", dir.display()))
        })?;

        // Dropping `temp_path` on any early return removes the partial file.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".autobackup-incoming")
            .tempfile_in(dir)
            .map_err(|e| BackupError::storage(format!("Failed to create temp file in {}: {e}", dir.display())))?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let written = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(BackupError::cancelled(format!("upload to {self} cancelled")));
            }
            copied = tokio::io::copy(reader, &mut file) => copied.map_err(|e| {
                BackupError::storage(format!("Failed to write upload for {}: {e}", self.path.display()))
            })?,
        };

        file.flush()
            .await
            .map_err(|e| BackupError::storage(format!("Failed to flush upload: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| BackupError::storage(format!("Failed to sync upload: {e}")))?;
        drop(file);

        temp_path.persist(&self.path).map_err(|e| {
            BackupError::storage(format!(
                "Failed to move upload into place at {}: {}",
                self.path.display(),
                e.error
            ))
        })?;

        debug!(path = %self.path.display(), bytes = written, "Wrote upload to local storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_writes_destination() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("nested/dir/latest.bin");
        let storage = LocalFileStorage::new(&dest);

        let mut data: &[u8] = b"first";
        storage.upload(&CancellationToken::new(), &mut data).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");

        let mut data: &[u8] = b"second upload replaces the first";
        storage.upload(&CancellationToken::new(), &mut data).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"second upload replaces the first");
    }

    #[tokio::test]
    async fn test_upload_empty_stream() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("empty.bin");
        let storage = LocalFileStorage::new(&dest);

        let mut data: &[u8] = b"";
        storage.upload(&CancellationToken::new(), &mut data).await.unwrap();
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("latest.bin");
        let storage = LocalFileStorage::new(&dest);

        let cancel = CancellationToken::new();
        cancel.cancel();

        // A pending stream never yields, so only cancellation can finish the upload.
        let (mut never, _keep_open) = tokio::io::duplex(64);
        let result = storage.upload(&cancel, &mut never).await;

        assert!(matches!(result, Err(BackupError::Cancelled(_))));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_display_names_destination() {
        let storage = LocalFileStorage::new("/tmp/x.gz");
        assert_eq!(storage.to_string(), "local:/tmp/x.gz");
    }
}
