/*!
Content digests used to detect unchanged snapshots between upload cycles.
*/

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::{BackupError, Result};

/// SHA-256 digest of a file's full byte content
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Sum([u8; 32]);

impl Sha256Sum {
    /// Digest an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Sha256Sum {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Sha256Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Sha256Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Sum({self})")
    }
}

impl FromStr for Sha256Sum {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| BackupError::validation(format!("Invalid SHA-256 digest '{s}': {e}")))?;
        Ok(Self(bytes))
    }
}

/// Compute the SHA-256 digest of the file at `path`
///
/// The file is streamed, so arbitrarily large snapshots are digested in constant memory.
pub fn file_sha256(path: &Path) -> Result<Sha256Sum> {
    let file = File::open(path).map_err(|e| {
        BackupError::checksum(format!("Failed to open {} for digest: {e}", path.display()))
    })?;

    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher).map_err(|e| {
        BackupError::checksum(format!("Failed to read {} for digest: {e}", path.display()))
    })?;

    Ok(Sha256Sum(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identical_files_have_equal_digests() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        std::fs::write(&a, b"snapshot contents").unwrap();
        std::fs::write(&b, b"snapshot contents").unwrap();

        assert_eq!(file_sha256(&a).unwrap(), file_sha256(&b).unwrap());
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        std::fs::write(&a, b"ab").unwrap();
        std::fs::write(&b, b"ba").unwrap();

        assert_ne!(file_sha256(&a).unwrap(), file_sha256(&b).unwrap());
    }

    #[test]
    fn test_file_digest_matches_buffer_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let sum = file_sha256(&path).unwrap();
        assert_eq!(sum, Sha256Sum::of_bytes(b""));
        assert_eq!(
            sum.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_missing_file_is_checksum_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = file_sha256(&temp_dir.path().join("missing"));

        assert!(matches!(result, Err(BackupError::Checksum(_))));
    }

    #[test]
    fn test_parse_display_form() {
        let sum = Sha256Sum::of_bytes(b"v1");
        let parsed: Sha256Sum = sum.to_string().parse().unwrap();
        assert_eq!(parsed, sum);

        assert!("not-hex".parse::<Sha256Sum>().is_err());
    }
}
