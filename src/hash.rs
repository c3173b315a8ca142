// src/hash.rs

//! SHA-256 digests for artifacts, manifests and receipts
//!
//! Every digest the engine records is lowercase hex SHA-256. Files are
//! streamed so large assets are never loaded whole just to be hashed.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Length of a hex-encoded SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// Incremental SHA-256 hasher producing hex digests
#[derive(Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the hex digest
    pub fn finalize(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Hex SHA-256 of a byte slice
pub fn sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Raw SHA-256 of a byte slice
pub fn sha256_raw(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hex SHA-256 of everything a reader yields
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    sha256_reader(&mut file).map_err(|e| Error::io(path, e))
}

/// How a file on disk compares to a recorded digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    /// Content hash equals the recorded digest
    Unchanged,
    /// Content differs; carries the current digest
    Modified(String),
    /// Nothing at the path
    Missing,
}

/// Compare a file against a recorded digest
pub fn file_state(path: &Path, expected: &str) -> Result<FileState> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_file() => {
            let actual = sha256_file(path)?;
            if actual.eq_ignore_ascii_case(expected) {
                Ok(FileState::Unchanged)
            } else {
                Ok(FileState::Modified(actual))
            }
        }
        Ok(_) => Ok(FileState::Modified(String::new())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileState::Missing),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Check that a string looks like a hex SHA-256 digest
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(sha256(b"").len(), SHA256_HEX_LEN);
    }

    #[test]
    fn test_hasher_incremental() {
        let mut hasher = Hasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert_eq!(hasher.finalize(), sha256(b"Hello, World!"));
    }

    #[test]
    fn test_sha256_reader() {
        let data = b"Hello, World!";
        let mut cursor = std::io::Cursor::new(data);
        assert_eq!(sha256_reader(&mut cursor).unwrap(), sha256(data));
    }

    #[test]
    fn test_file_state() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("README.md");
        std::fs::write(&path, "# demo\n").unwrap();
        let recorded = sha256(b"# demo\n");

        assert_eq!(file_state(&path, &recorded).unwrap(), FileState::Unchanged);
        assert_eq!(
            file_state(&path, &recorded.to_uppercase()).unwrap(),
            FileState::Unchanged
        );

        std::fs::write(&path, "# edited\n").unwrap();
        assert_eq!(
            file_state(&path, &recorded).unwrap(),
            FileState::Modified(sha256(b"# edited\n"))
        );

        std::fs::remove_file(&path).unwrap();
        assert_eq!(file_state(&path, &recorded).unwrap(), FileState::Missing);
    }

    #[test]
    fn test_is_sha256_hex() {
        assert!(is_sha256_hex(&sha256(b"x")));
        assert!(!is_sha256_hex("abc123"));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }
}
