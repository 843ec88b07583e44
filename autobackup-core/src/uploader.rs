/*!
Periodic snapshot upload service.

An [`Uploader`] runs one upload cycle per tick of a fixed interval:

1. stage a fresh temp file,
2. have the [`DataProvider`] write the snapshot into it,
3. optionally compress it in place,
4. digest it and skip the upload if the digest matches the last successful upload,
5. stream it to the [`StorageClient`] through a byte counter.

The digest baseline only moves on a successful upload, so failed uploads are retried with
the same content on the next tick and identical content is never uploaded twice in a row.
Cycles run one at a time inside the scheduler loop; counters and status can be read
concurrently from other tasks.
*/

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum::{file_sha256, Sha256Sum};
use crate::compression::{compress_file, CompressionAdapter, GzipCompressor};
use crate::config::UploaderConfig;
use crate::provider::DataProvider;
use crate::staging::{CountingReader, StagingArea};
use crate::storage::StorageClient;
use crate::{BackupError, Result};

/// Shortest interval the scheduler will tick at
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Upload counters shared between the scheduler and any number of readers
#[derive(Debug, Default)]
pub struct UploadCounters {
    uploads_ok: AtomicU64,
    uploads_fail: AtomicU64,
    uploads_skipped: AtomicU64,
    total_upload_bytes: AtomicU64,
    last_upload_bytes: AtomicU64,
}

/// Point-in-time copy of [`UploadCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub num_uploads_ok: u64,
    pub num_uploads_fail: u64,
    pub num_uploads_skipped: u64,
    pub total_upload_bytes: u64,
    pub last_upload_bytes: u64,
}

impl UploadCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_success(&self, bytes: u64) {
        self.uploads_ok.fetch_add(1, Ordering::Relaxed);
        self.total_upload_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.last_upload_bytes.store(bytes, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.uploads_fail.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skip(&self) {
        self.uploads_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            num_uploads_ok: self.uploads_ok.load(Ordering::Relaxed),
            num_uploads_fail: self.uploads_fail.load(Ordering::Relaxed),
            num_uploads_skipped: self.uploads_skipped.load(Ordering::Relaxed),
            total_upload_bytes: self.total_upload_bytes.load(Ordering::Relaxed),
            last_upload_bytes: self.last_upload_bytes.load(Ordering::Relaxed),
        }
    }
}

/// What a completed cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The snapshot was transmitted
    Uploaded {
        sum: Sha256Sum,
        bytes: u64,
        duration: Duration,
    },
    /// The snapshot matched the last upload and was not transmitted
    Skipped { sum: Sha256Sum },
}

/// Status snapshot for external introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploaderStatus {
    pub upload_destination: String,
    pub upload_interval: String,
    pub compress: bool,
    /// RFC 3339 time of the last successful upload, empty before the first one
    pub last_upload_time: String,
    pub last_upload_duration: String,
    /// Hex digest of the last successful upload, empty when there is no baseline
    pub last_upload_sum: String,
}

impl UploaderStatus {
    /// Render as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "upload_destination": self.upload_destination,
            "upload_interval": self.upload_interval,
            "compress": self.compress,
            "last_upload_time": self.last_upload_time,
            "last_upload_duration": self.last_upload_duration,
            "last_upload_sum": self.last_upload_sum,
        })
    }
}

/// Fields written by cycles and read by status queries
#[derive(Debug, Default)]
struct CycleState {
    last_sum: Option<Sha256Sum>,
    last_upload_time: Option<DateTime<Utc>>,
    last_upload_duration: Duration,
}

/// Service that periodically uploads snapshots, skipping unchanged ones
///
/// # Example
/// ```rust,no_run
/// use std::time::Duration;
/// use autobackup_core::{FileProvider, LocalFileStorage, Uploader};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() {
/// let uploader = Uploader::new(
///     LocalFileStorage::new("/var/backups/state.db.gz"),
///     FileProvider::new("/var/lib/app/state.db"),
///     Duration::from_secs(60),
///     true,
/// );
///
/// let cancel = CancellationToken::new();
/// uploader.start(cancel.clone()).await;
/// # }
/// ```
pub struct Uploader<S, P>
where
    S: StorageClient,
    P: DataProvider,
{
    storage: S,
    provider: P,
    interval: Duration,
    compressor: Option<Arc<dyn CompressionAdapter>>,
    staging: StagingArea,
    counters: Arc<UploadCounters>,
    state: Mutex<CycleState>,
    dedup_check: bool,
}

impl<S, P> Uploader<S, P>
where
    S: StorageClient,
    P: DataProvider,
{
    /// Create an uploader; `compress` enables gzip at the default level
    ///
    /// Intervals shorter than one millisecond, including zero, are raised to one millisecond.
    pub fn new(storage: S, provider: P, interval: Duration, compress: bool) -> Self {
        let compressor: Option<Arc<dyn CompressionAdapter>> = if compress {
            Some(Arc::new(GzipCompressor::new()))
        } else {
            None
        };

        Self {
            storage,
            provider,
            interval: interval.max(MIN_INTERVAL),
            compressor,
            staging: StagingArea::new(),
            counters: Arc::new(UploadCounters::new()),
            state: Mutex::new(CycleState::default()),
            dedup_check: true,
        }
    }

    /// Create an uploader from validated configuration
    pub fn from_config(storage: S, provider: P, config: &UploaderConfig) -> Result<Self> {
        config.validate()?;

        let mut uploader = Self::new(storage, provider, config.interval(), false);
        if config.compress {
            uploader = uploader.with_compressor(GzipCompressor::with_level(config.compression_level));
        }
        if let Some(dir) = &config.staging_dir {
            uploader = uploader.with_staging_area(StagingArea::in_dir(dir));
        }
        Ok(uploader)
    }

    /// Compress staged snapshots with `compressor`
    pub fn with_compressor<C: CompressionAdapter + 'static>(mut self, compressor: C) -> Self {
        self.compressor = Some(Arc::new(compressor));
        self
    }

    pub fn with_staging_area(mut self, staging: StagingArea) -> Self {
        self.staging = staging;
        self
    }

    /// Record into an existing counter set, e.g. one shared with a metrics exporter
    pub fn with_counters(mut self, counters: Arc<UploadCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Upload every cycle even when content is unchanged. Test use only.
    #[doc(hidden)]
    pub fn disable_dedup_check(mut self) -> Self {
        self.dedup_check = false;
        self
    }

    pub fn counters(&self) -> Arc<UploadCounters> {
        Arc::clone(&self.counters)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Digest of the last successful upload, if any
    pub fn last_sum(&self) -> Option<Sha256Sum> {
        self.lock_state().last_sum
    }

    /// Forget the dedup baseline so the next cycle uploads unconditionally
    pub fn reset_last_sum(&self) {
        self.lock_state().last_sum = None;
    }

    /// Run upload cycles every interval until `cancel` fires
    pub async fn start(&self, cancel: CancellationToken) {
        self.start_with_gate(cancel, || true).await
    }

    /// Run upload cycles every interval until `cancel` fires, skipping ticks while
    /// `is_enabled` returns false
    ///
    /// A disabled tick clears the dedup baseline, so the first enabled tick afterwards
    /// always uploads. Cycle errors are logged and never stop the loop. Cancellation is
    /// checked between ticks; an upload in flight sees it through its storage call.
    pub async fn start_with_gate<G>(&self, cancel: CancellationToken, is_enabled: G)
    where
        G: Fn() -> bool,
    {
        info!(
            destination = %self.storage,
            interval = ?self.interval,
            "starting upload service"
        );

        let mut ticker = interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(destination = %self.storage, "upload service shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if !is_enabled() {
                        // Nothing is known about what changed while disabled.
                        self.reset_last_sum();
                        debug!(destination = %self.storage, "upload disabled, skipping tick");
                        continue;
                    }
                    if let Err(e) = self.upload(&cancel).await {
                        warn!(
                            destination = %self.storage,
                            kind = e.kind(),
                            error = %e,
                            "failed to upload"
                        );
                    }
                }
            }
        }
    }

    /// Run a single upload cycle
    ///
    /// Counters are only touched once the cycle reaches the dedup decision: provider,
    /// compression, digest and staging failures return an error without counting.
    pub async fn upload(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        let staged = self.staging.stage()?;

        self.provider
            .provide(staged.path())
            .await
            .map_err(|e| match e {
                e @ BackupError::Provider(_) => e,
                other => BackupError::from_provider(other),
            })?;

        if let Some(compressor) = &self.compressor {
            let compressor = Arc::clone(compressor);
            let path = staged.path().to_path_buf();
            tokio::task::spawn_blocking(move || compress_file(compressor.as_ref(), &path))
                .await
                .map_err(|e| BackupError::compression(format!("Compression task failed: {e}")))??;
        }

        let path = staged.path().to_path_buf();
        let sum = tokio::task::spawn_blocking(move || file_sha256(&path))
            .await
            .map_err(|e| BackupError::checksum(format!("Digest task failed: {e}")))??;

        let unchanged = self.dedup_check && self.lock_state().last_sum == Some(sum);
        if unchanged {
            self.counters.record_skip();
            debug!(destination = %self.storage, sum = %sum, "snapshot unchanged, skipping upload");
            return Ok(CycleOutcome::Skipped { sum });
        }

        let file = tokio::fs::File::open(staged.path())
            .await
            .map_err(|e| BackupError::staging(format!("Failed to open staged snapshot: {e}")))?;
        let mut reader = CountingReader::new(file);

        let started = Instant::now();
        let result = self.storage.upload(cancel, &mut reader).await;
        let duration = started.elapsed();

        match result {
            Err(e) => {
                self.counters.record_failure();
                Err(e)
            }
            Ok(()) => {
                let bytes = reader.count();
                {
                    let mut state = self.lock_state();
                    state.last_sum = Some(sum);
                    state.last_upload_time = Some(Utc::now());
                    state.last_upload_duration = duration;
                }
                self.counters.record_success(bytes);
                info!(
                    destination = %self.storage,
                    sum = %sum,
                    bytes,
                    duration = ?duration,
                    "uploaded snapshot"
                );
                Ok(CycleOutcome::Uploaded { sum, bytes, duration })
            }
        }
    }

    /// Current configuration and last successful upload
    pub fn status(&self) -> UploaderStatus {
        let state = self.lock_state();
        UploaderStatus {
            upload_destination: self.storage.to_string(),
            upload_interval: format!("{:?}", self.interval),
            compress: self.compressor.is_some(),
            last_upload_time: state
                .last_upload_time
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
            last_upload_duration: format!("{:?}", state.last_upload_duration),
            last_upload_sum: state.last_sum.map(|s| s.to_string()).unwrap_or_default(),
        }
    }

    // The guarded fields are plain values that are always consistent, so a panic
    // elsewhere while holding the lock leaves nothing to repair.
    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::io::{AsyncRead, AsyncReadExt};

    struct FixedProvider(&'static [u8]);

    #[async_trait]
    impl DataProvider for FixedProvider {
        async fn provide(&self, path: &Path) -> Result<()> {
            tokio::fs::write(path, self.0).await?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct SinkStorage {
        received: Mutex<Vec<Vec<u8>>>,
    }

    impl std::fmt::Display for SinkStorage {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("sink")
        }
    }

    #[async_trait]
    impl StorageClient for SinkStorage {
        async fn upload(
            &self,
            _cancel: &CancellationToken,
            reader: &mut (dyn AsyncRead + Send + Unpin),
        ) -> Result<()> {
            let mut data = Vec::new();
            reader.read_to_end(&mut data).await?;
            self.received.lock().unwrap().push(data);
            Ok(())
        }
    }

    fn uploader(temp_dir: &TempDir, data: &'static [u8]) -> Uploader<SinkStorage, FixedProvider> {
        Uploader::new(
            SinkStorage::default(),
            FixedProvider(data),
            Duration::from_millis(100),
            false,
        )
        .with_staging_area(StagingArea::in_dir(temp_dir.path()))
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = Uploader::new(
            SinkStorage::default(),
            FixedProvider(b"v1"),
            Duration::ZERO,
            false,
        )
        .with_staging_area(StagingArea::in_dir(temp_dir.path()));
        assert_eq!(uploader.interval(), MIN_INTERVAL);

        let cancel = CancellationToken::new();
        cancel.cancel();
        uploader.start(cancel).await;
        assert_eq!(uploader.counters().snapshot(), CounterSnapshot::default());
    }

    #[tokio::test]
    async fn test_status_before_first_upload() {
        let temp_dir = TempDir::new().unwrap();
        let status = uploader(&temp_dir, b"v1").status();

        assert_eq!(status.upload_destination, "sink");
        assert_eq!(status.upload_interval, "100ms");
        assert!(!status.compress);
        assert_eq!(status.last_upload_time, "");
        assert_eq!(status.last_upload_sum, "");
    }

    #[tokio::test]
    async fn test_status_after_upload() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = uploader(&temp_dir, b"v1");

        uploader.upload(&CancellationToken::new()).await.unwrap();
        let status = uploader.status();

        assert_eq!(status.last_upload_sum, Sha256Sum::of_bytes(b"v1").to_string());
        assert!(DateTime::parse_from_rfc3339(&status.last_upload_time).is_ok());
        assert!(status.last_upload_time.ends_with('Z'));

        let json = status.to_json();
        assert_eq!(json["upload_destination"], "sink");
        assert_eq!(json["compress"], false);
    }

    #[tokio::test]
    async fn test_cycle_removes_staged_files() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = uploader(&temp_dir, b"v1").with_compressor(GzipCompressor::new());

        uploader.upload(&CancellationToken::new()).await.unwrap();
        uploader.upload(&CancellationToken::new()).await.unwrap();

        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_staging_failure_touches_no_counters() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = uploader(&temp_dir, b"v1")
            .with_staging_area(StagingArea::in_dir(temp_dir.path().join("missing")));

        let result = uploader.upload(&CancellationToken::new()).await;
        assert!(matches!(result, Err(BackupError::Staging(_))));
        assert_eq!(uploader.counters().snapshot(), CounterSnapshot::default());
    }

    #[tokio::test]
    async fn test_disabled_dedup_uploads_every_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = uploader(&temp_dir, b"v1").disable_dedup_check();

        for _ in 0..3 {
            let outcome = uploader.upload(&CancellationToken::new()).await.unwrap();
            assert!(matches!(outcome, CycleOutcome::Uploaded { bytes: 2, .. }));
        }
        assert_eq!(uploader.storage().received.lock().unwrap().len(), 3);
        assert_eq!(uploader.counters().snapshot().num_uploads_skipped, 0);
    }

    #[tokio::test]
    async fn test_from_config_applies_settings() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = UploaderConfig::new(crate::config::StorageConfig::local(
            temp_dir.path().join("out.gz"),
        ));
        config.interval_ms = 250;
        config.compress = true;
        config.compression_level = 9;
        config.staging_dir = Some(temp_dir.path().to_path_buf());

        let uploader =
            Uploader::from_config(SinkStorage::default(), FixedProvider(b"v1"), &config).unwrap();
        assert_eq!(uploader.interval(), Duration::from_millis(250));
        assert!(uploader.status().compress);

        config.interval_ms = 0;
        assert!(
            Uploader::from_config(SinkStorage::default(), FixedProvider(b"v1"), &config).is_err()
        );
    }

    #[test]
    fn test_counters_accumulate() {
        let counters = UploadCounters::new();
        counters.record_success(10);
        counters.record_success(5);
        counters.record_failure();
        counters.record_skip();

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                num_uploads_ok: 2,
                num_uploads_fail: 1,
                num_uploads_skipped: 1,
                total_upload_bytes: 15,
                last_upload_bytes: 5,
            }
        );
    }
}
