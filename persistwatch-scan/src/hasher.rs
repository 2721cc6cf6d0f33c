//! Content hasher — lowercase hex SHA-256 of raw bytes.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{io_err, ScanError};

/// Digest of an in-memory buffer (synthetic items, already-read files).
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Digest of a file's raw bytes, streamed in 8 KiB chunks.
pub fn digest_file(path: &Path) -> Result<String, ScanError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer).map_err(|e| io_err(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_input_has_known_digest() {
        assert_eq!(
            digest_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn file_and_buffer_digests_agree() {
        let file = NamedTempFile::new().unwrap();
        let content = vec![b'x'; 20_000];
        std::fs::write(file.path(), &content).unwrap();
        assert_eq!(digest_file(file.path()).unwrap(), digest_bytes(&content));
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let digest = digest_bytes(b"persist");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = digest_file(Path::new("/nonexistent/a.plist")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/a.plist"));
    }
}
