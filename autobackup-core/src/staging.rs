/*!
Scratch files for upload cycles and a byte-counting stream wrapper.

Every cycle stages its snapshot in a uniquely named file under a [`StagingArea`].
[`StagedFile`] removes that file on every exit path, success or failure.
*/

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tracing::warn;

use crate::{BackupError, Result};

const TEMP_PREFIX: &str = "autobackup-upload";

/// Directory in which upload cycles create their temporary files
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Stage files in the system temp directory
    pub fn new() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }

    /// Stage files in `dir`, which must already exist
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new, empty, uniquely named file and return its path
    ///
    /// The file outlives this call; the caller is responsible for removing it.
    pub fn create_temp(&self) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| {
                BackupError::staging(format!(
                    "Failed to create temp file in {}: {e}",
                    self.dir.display()
                ))
            })?;

        let (_file, path) = file
            .keep()
            .map_err(|e| BackupError::staging(format!("Failed to keep temp file: {e}")))?;
        Ok(path)
    }

    /// Create a temp file owned by a guard that deletes it when dropped
    pub fn stage(&self) -> Result<StagedFile> {
        self.create_temp().map(StagedFile::new)
    }
}

impl Default for StagingArea {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `path`, treating an already-missing file as success
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Scoped owner of a staged path; the file is removed on drop
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staged file");
        }
    }
}

/// Async reader that counts the bytes passed through it without altering them
///
/// Read [`CountingReader::count`] only after the stream has been drained.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    /// Bytes read so far
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.count += (buf.filled().len() - before) as u64;
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_create_temp_is_unique_and_empty() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::in_dir(temp_dir.path());

        let a = staging.create_temp().unwrap();
        let b = staging.create_temp().unwrap();

        assert_ne!(a, b);
        assert!(a.starts_with(temp_dir.path()));
        assert_eq!(std::fs::metadata(&a).unwrap().len(), 0);
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(TEMP_PREFIX));
    }

    #[test]
    fn test_create_temp_in_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::in_dir(temp_dir.path().join("nope"));

        assert!(matches!(staging.create_temp(), Err(BackupError::Staging(_))));
    }

    #[test]
    fn test_remove_if_exists_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file");
        std::fs::write(&path, b"x").unwrap();

        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
        remove_if_exists(&path).unwrap();
    }

    #[test]
    fn test_staged_file_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::in_dir(temp_dir.path());

        let staged = staging.stage().unwrap();
        let path = staged.path().to_path_buf();
        std::fs::write(&path, b"snapshot").unwrap();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_counting_reader_passes_data_through() {
        let data = b"0123456789".repeat(1000);
        let mut reader = CountingReader::new(&data[..]);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
        assert_eq!(reader.count(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_counting_reader_empty_stream() {
        let mut reader = CountingReader::new(tokio::io::empty());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(reader.count(), 0);
    }
}
