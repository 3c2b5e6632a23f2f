// plantvault/src/utils/checksum.rs
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::errors::Result;

const CHUNK_SIZE: usize = 64 * 1024;

/// Streams a file through SHA-256 and returns the lowercase hex digest.
///
/// The file is read in fixed-size chunks; it is never loaded whole.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Async wrapper running [`sha256_file`] on the blocking pool.
pub async fn sha256_file_async(path: &Path) -> Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file(&path)).await?
}

/// Case-insensitive comparison of two hex digests.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use std::io::Write;

    #[test]
    fn known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_is_deterministic_and_detects_single_byte_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");
        let mut content = Vec::new();
        for i in 0..200_000u32 {
            content.push((i % 251) as u8);
        }
        std::fs::write(&path, &content).unwrap();

        let first = sha256_file(&path).unwrap();
        let second = sha256_file(&path).unwrap();
        assert_eq!(first, second);

        content[123_456] ^= 0x01;
        std::fs::write(&path, &content).unwrap();
        assert_ne!(first, sha256_file(&path).unwrap());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = sha256_file(&dir.path().join("nope.sql.gz")).unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[tokio::test]
    async fn async_wrapper_matches_sync() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"INSERT INTO plantas VALUES (1);").unwrap();

        let sync = sha256_file(file.path()).unwrap();
        let async_digest = sha256_file_async(file.path()).await.unwrap();
        assert!(digests_match(&sync.to_uppercase(), &async_digest));
    }
}
