/*!
# Autobackup Core

Periodic snapshot upload with content deduplication.

An [`Uploader`] asks a [`DataProvider`] for a fresh snapshot on every tick, optionally
gzips it, and streams it to a [`StorageClient`] unless its SHA-256 digest matches the last
successful upload.

## Architecture

- Snapshot production and storage are capabilities supplied by the caller
- Staging, compression and digesting are local, synchronous file operations
- Counters are atomics that any task can read while cycles run

## Usage

```rust,no_run
use std::time::Duration;
use autobackup_core::{FileProvider, LocalFileStorage, Uploader};
use tokio_util::sync::CancellationToken;

# async fn demo() {
let uploader = Uploader::new(
    LocalFileStorage::new("/backups/app.db.gz"),
    FileProvider::new("/var/lib/app/app.db"),
    Duration::from_secs(30),
    true,
);

let cancel = CancellationToken::new();
// Runs until `cancel` fires.
uploader.start(cancel).await;
println!("{:?}", uploader.counters().snapshot());
# }
```
*/

pub mod checksum;
pub mod compression;
pub mod config;
pub mod error;
pub mod observability;
pub mod provider;
pub mod staging;
pub mod storage;
pub mod uploader;

pub use checksum::{file_sha256, Sha256Sum};
pub use compression::{compress_file, CompressionAdapter, GzipCompressor};
pub use config::{StorageBackend, StorageConfig, UploaderConfig};
pub use error::{BackupError, Result};
pub use provider::{DataProvider, FileProvider};
pub use staging::{remove_if_exists, CountingReader, StagedFile, StagingArea};
#[cfg(feature = "local")]
pub use storage::LocalFileStorage;
#[cfg(feature = "s3")]
pub use storage::S3StorageAdapter;
pub use storage::{create_storage, StorageClient};
pub use uploader::{CounterSnapshot, CycleOutcome, UploadCounters, Uploader, UploaderStatus};
