/*!
Storage backends that receive uploaded snapshots.

The uploader only ever hands a backend the *next* artifact as a byte stream; what the
backend does with earlier ones (overwrite, version, expire) is its own business.
*/

#[cfg(feature = "local")]
pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::config::{StorageBackend, StorageConfig};
use crate::{BackupError, Result};

/// Destination for uploaded snapshots
///
/// `Display` names the destination in logs and status output.
#[async_trait]
pub trait StorageClient: fmt::Display + Send + Sync {
    /// Upload everything readable from `reader`
    ///
    /// Implementations must either consume the stream fully or fail, and must accept
    /// streams of any length including zero. `cancel` firing should abort the upload
    /// promptly with an error.
    async fn upload(
        &self,
        cancel: &CancellationToken,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()>;
}

#[async_trait]
impl<T: StorageClient + ?Sized> StorageClient for Box<T> {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        (**self).upload(cancel, reader).await
    }
}

#[async_trait]
impl<T: StorageClient + ?Sized> StorageClient for Arc<T> {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        (**self).upload(cancel, reader).await
    }
}

/// Build the storage backend described by `config`
pub async fn create_storage(config: &StorageConfig) -> Result<Box<dyn StorageClient>> {
    config.validate()?;

    match config.backend {
        #[cfg(feature = "local")]
        StorageBackend::Local => {
            let path = config
                .local_path
                .as_ref()
                .ok_or_else(|| BackupError::validation("Local backend requires a path"))?;
            Ok(Box::new(LocalFileStorage::new(path)))
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            let adapter = S3StorageAdapter::from_config(config).await?;
            Ok(Box::new(adapter))
        }
        #[allow(unreachable_patterns)]
        ref backend => Err(BackupError::validation(format!(
            "Storage backend {backend:?} is not enabled in this build"
        ))),
    }
}

// Re-export types for convenience
#[cfg(feature = "local")]
pub use local::LocalFileStorage;
#[cfg(feature = "s3")]
pub use s3::S3StorageAdapter;
