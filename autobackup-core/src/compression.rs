/*!
Compression adapters for staged snapshot files.

The default implementation uses gzip. Output is deterministic for a given input and level
(the gzip header carries no timestamp or file name), so compressing unchanged content
yields an unchanged digest.
*/

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::{BackupError, Result};

/// Compression abstraction for snapshot data
///
/// Implementations stream from `input` to `output` and must not depend on anything but
/// the input bytes, otherwise unchanged snapshots would stop deduplicating.
pub trait CompressionAdapter: Send + Sync {
    /// Compress everything readable from `input` into `output`
    ///
    /// # Returns
    /// The number of uncompressed bytes consumed
    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64>;

    /// Decompress everything readable from `input` into `output`
    ///
    /// # Returns
    /// The number of decompressed bytes written
    fn decompress(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64>;

    /// Get the name of the compression algorithm
    fn algorithm_name(&self) -> &str;
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use autobackup_core::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let mut compressed = Vec::new();
/// compressor.compress(&mut &b"snapshot"[..], &mut compressed)?;
///
/// let mut restored = Vec::new();
/// compressor.decompress(&mut &compressed[..], &mut restored)?;
/// assert_eq!(restored, b"snapshot");
/// # Ok::<(), autobackup_core::BackupError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a new gzip compressor with the specified compression level
    ///
    /// # Arguments
    /// * `level` - Compression level (0-9, where 0 is no compression and 9 is maximum)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level),
        }
    }

    /// Create a compressor for fast compression (level 1)
    pub fn fast() -> Self {
        Self::with_level(1)
    }

    /// Create a compressor for maximum compression (level 9)
    pub fn max() -> Self {
        Self::with_level(9)
    }

    pub fn level(&self) -> u32 {
        self.compression_level.level()
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
        let mut encoder = GzEncoder::new(output, self.compression_level);

        let consumed = io::copy(input, &mut encoder)
            .map_err(|e| BackupError::compression(format!("Failed to write data for compression: {e}")))?;

        encoder
            .finish()
            .map_err(|e| BackupError::compression(format!("Failed to finish compression: {e}")))?;

        Ok(consumed)
    }

    fn decompress(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
        let mut decoder = GzDecoder::new(input);

        io::copy(&mut decoder, output)
            .map_err(|e| BackupError::compression(format!("Failed to decompress data: {e}")))
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

/// Compress the file at `path` in place
///
/// The compressed form is written to a sibling temp file which is then renamed over `path`,
/// so callers keep using the same path whether or not compression ran. If anything fails
/// before the rename, `path` still holds the original bytes and the temp file is removed.
pub fn compress_file(compressor: &dyn CompressionAdapter, path: &Path) -> Result<u64> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let source = File::open(path).map_err(|e| {
        BackupError::compression(format!("Failed to open {} for compression: {e}", path.display()))
    })?;

    let mut compressed = tempfile::Builder::new()
        .prefix(".autobackup-compress")
        .tempfile_in(dir)
        .map_err(|e| {
            BackupError::compression(format!("Failed to create compression output in {}: {e}", dir.display()))
        })?;

    let consumed = {
        let mut writer = BufWriter::new(compressed.as_file_mut());
        let consumed = compressor.compress(&mut BufReader::new(source), &mut writer)?;
        writer
            .flush()
            .map_err(|e| BackupError::compression(format!("Failed to flush compressed output: {e}")))?;
        consumed
    };

    compressed.persist(path).map_err(|e| {
        BackupError::compression(format!(
            "Failed to replace {} with compressed output: {}",
            path.display(),
            e.error
        ))
    })?;

    Ok(consumed)
}
