//! Configuration for the upload service and its storage destination
//!
//! Configuration is plain serde data, usually loaded from a JSON file, and validated
//! before an uploader is built from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{BackupError, Result};

/// Default period between upload cycles
pub const DEFAULT_INTERVAL_MS: u64 = 30_000;

/// Default gzip level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Enumeration of supported storage backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    /// Local filesystem storage
    Local,
    /// Amazon S3 cloud storage
    S3,
}

/// Configuration structure for the upload destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// The storage backend to use
    pub backend: StorageBackend,
    /// S3 bucket name (required for S3 backend)
    #[serde(default)]
    pub s3_bucket: Option<String>,
    /// S3 object key uploads are written to (required for S3 backend)
    #[serde(default)]
    pub s3_key: Option<String>,
    /// AWS region for S3 operations (optional, defaults to environment)
    #[serde(default)]
    pub s3_region: Option<String>,
    /// Destination file for local storage (required for local backend)
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Create a local configuration with no destination set
    pub fn default_local() -> Self {
        StorageConfig {
            backend: StorageBackend::Local,
            s3_bucket: None,
            s3_key: None,
            s3_region: None,
            local_path: None,
        }
    }

    /// Create a local configuration writing to `path`
    pub fn local<P: AsRef<Path>>(path: P) -> Self {
        StorageConfig {
            local_path: Some(path.as_ref().to_path_buf()),
            ..Self::default_local()
        }
    }

    /// Create an S3 configuration with specified bucket and key
    pub fn s3_with_bucket(bucket: String, key: String) -> Self {
        StorageConfig {
            backend: StorageBackend::S3,
            s3_bucket: Some(bucket),
            s3_key: Some(key),
            s3_region: None,
            local_path: None,
        }
    }

    /// Parse a destination URI
    ///
    /// Supports formats:
    /// - `s3://bucket-name/path/to/key` for S3 storage
    /// - `file:///local/path`, `/local/path` or `./relative/path` for local storage
    pub fn from_uri(uri: &str) -> Result<StorageConfig> {
        if let Some(s3_part) = uri.strip_prefix("s3://") {
            let (bucket, key) = s3_part.split_once('/').unwrap_or((s3_part, ""));
            if bucket.is_empty() {
                return Err(BackupError::validation("Invalid S3 URI: missing bucket name"));
            }
            if key.is_empty() {
                return Err(BackupError::validation("Invalid S3 URI: missing object key"));
            }
            Ok(StorageConfig::s3_with_bucket(bucket.to_string(), key.to_string()))
        } else {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            if path.is_empty() {
                return Err(BackupError::validation("Invalid destination: empty path"));
            }
            Ok(StorageConfig::local(path))
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            StorageBackend::S3 => {
                if self.s3_bucket.as_deref().map_or(true, str::is_empty) {
                    return Err(BackupError::validation(
                        "S3 backend requires a valid bucket name",
                    ));
                }
                if self.s3_key.as_deref().map_or(true, str::is_empty) {
                    return Err(BackupError::validation("S3 backend requires an object key"));
                }
            }
            StorageBackend::Local => {
                if self
                    .local_path
                    .as_ref()
                    .map_or(true, |p| p.as_os_str().is_empty())
                {
                    return Err(BackupError::validation("Local backend requires a path"));
                }
            }
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::default_local()
    }
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

/// Settings for one upload service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Where snapshots are uploaded
    pub destination: StorageConfig,
    /// Milliseconds between upload cycles
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Gzip staged snapshots before digesting and uploading them
    #[serde(default)]
    pub compress: bool,
    /// Gzip level, 0-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// Scratch directory for staged files (defaults to the system temp dir)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl UploaderConfig {
    pub fn new(destination: StorageConfig) -> Self {
        Self {
            destination,
            interval_ms: DEFAULT_INTERVAL_MS,
            compress: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            staging_dir: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: UploaderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BackupError::validation(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.destination.validate()?;
        if self.interval_ms == 0 {
            return Err(BackupError::validation("Upload interval must be positive"));
        }
        if self.compression_level > 9 {
            return Err(BackupError::validation(format!(
                "Compression level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if let Some(dir) = &self.staging_dir {
            if !dir.is_dir() {
                return Err(BackupError::validation(format!(
                    "Staging directory {} does not exist",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}
