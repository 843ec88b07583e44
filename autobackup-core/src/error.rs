/*!
Error types for the autobackup core.

Each stage of an upload cycle reports failures through its own variant so that logs
identify where a cycle stopped.
*/

use std::fmt::Display;
use thiserror::Error;

/// Result type used throughout the autobackup core.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Errors that can occur while staging, compressing, digesting or uploading a snapshot.
#[derive(Error, Debug)]
pub enum BackupError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Temp file creation or cleanup failures
    #[error("Staging error: {0}")]
    Staging(String),

    /// The snapshot provider failed to produce data
    #[error("Provider error: {0}")]
    Provider(String),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// The staged file could not be digested
    #[error("Checksum error: {0}")]
    Checksum(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// The operation observed cancellation
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl BackupError {
    /// Create a new staging error
    pub fn staging<S: Into<String>>(msg: S) -> Self {
        Self::Staging(msg.into())
    }

    /// Create a new provider error
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new checksum error
    pub fn checksum<S: Into<String>>(msg: S) -> Self {
        Self::Checksum(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Re-label an arbitrary error as a provider failure, keeping its message
    pub(crate) fn from_provider(err: impl Display) -> Self {
        Self::Provider(err.to_string())
    }

    /// Short stage label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Staging(_) => "staging",
            Self::Provider(_) => "provider",
            Self::Compression(_) => "compression",
            Self::Checksum(_) => "checksum",
            Self::Storage(_) => "storage",
            Self::Cancelled(_) => "cancelled",
            Self::Validation(_) => "validation",
        }
    }
}
