//! Content fingerprints for model files.
//!
//! Files up to the sample threshold are hashed in full. Larger files are
//! hashed from the first and last sample window plus the file size, which
//! bounds I/O for multi-gigabyte checkpoints at the cost of exact identity:
//! two large files that agree on both windows and on length collide.

use crate::config::{FingerprintConfig, FingerprintSettings};
use crate::error::{ProvenanceError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    Full,
    Sampled,
}

/// Content-derived identity of an artifact (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub value: String,
    pub mode: FingerprintMode,
}

impl Fingerprint {
    pub fn is_sampled(&self) -> bool {
        self.mode == FingerprintMode::Sampled
    }
}

/// Compute the fingerprint of a file, blocking the current thread.
pub fn compute_fingerprint(
    path: impl AsRef<Path>,
    settings: &FingerprintSettings,
) -> Result<Fingerprint> {
    let path = path.as_ref();
    let mut file =
        std::fs::File::open(path).map_err(|e| ProvenanceError::io_with_path(e, path))?;

    let file_size = file
        .metadata()
        .map_err(|e| ProvenanceError::io_with_path(e, path))?
        .len();

    if file_size > settings.sample_threshold_bytes {
        let value = sampled_digest(&mut file, file_size, settings.sample_window_bytes)
            .map_err(|e| ProvenanceError::io_with_path(e, path))?;
        return Ok(Fingerprint {
            value,
            mode: FingerprintMode::Sampled,
        });
    }

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; FingerprintConfig::CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ProvenanceError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Fingerprint {
        value: hex::encode(hasher.finalize()),
        mode: FingerprintMode::Full,
    })
}

/// SHA-256 of (head window + tail window + little-endian size).
fn sampled_digest(file: &mut std::fs::File, file_size: u64, window: u64) -> std::io::Result<String> {
    let mut hasher = Sha256::new();

    let head_len = window.min(file_size) as usize;
    let mut head = vec![0u8; head_len];
    file.read_exact(&mut head)?;
    hasher.update(&head);

    let tail_len = window.min(file_size) as usize;
    file.seek(SeekFrom::Start(file_size - tail_len as u64))?;
    let mut tail = vec![0u8; tail_len];
    file.read_exact(&mut tail)?;
    hasher.update(&tail);

    hasher.update(file_size.to_le_bytes());

    Ok(hex::encode(hasher.finalize()))
}

/// Computes fingerprints off the async executor.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    settings: FingerprintSettings,
}

impl Fingerprinter {
    pub fn new(settings: FingerprintSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FingerprintSettings {
        &self.settings
    }

    /// Fingerprint a file on the blocking thread pool.
    pub async fn fingerprint(&self, path: impl Into<PathBuf>) -> Result<Fingerprint> {
        let path = path.into();
        let settings = self.settings;
        tokio::task::spawn_blocking(move || compute_fingerprint(&path, &settings))
            .await
            .map_err(|e| ProvenanceError::Other(format!("Fingerprint task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MIB: u64 = 1024 * 1024;

    /// Sparse file of `size` bytes with the given head and tail windows.
    fn sparse_file(size: u64, head: &[u8], middle: &[u8], tail: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.as_file().set_len(size).unwrap();
        file.write_all(head).unwrap();
        file.seek(SeekFrom::Start(size / 2)).unwrap();
        file.write_all(middle).unwrap();
        file.seek(SeekFrom::Start(size - tail.len() as u64)).unwrap();
        file.write_all(tail).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_full_fingerprint_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let fp = compute_fingerprint(file.path(), &FingerprintSettings::default()).unwrap();
        assert_eq!(fp.mode, FingerprintMode::Full);
        assert_eq!(
            fp.value,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Hello, World!").unwrap();
        file.flush().unwrap();

        let settings = FingerprintSettings::default();
        let first = compute_fingerprint(file.path(), &settings).unwrap();
        let second = compute_fingerprint(file.path(), &settings).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.value,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_sampled_fingerprint_ignores_middle() {
        let size = 150 * MIB;
        let head = vec![0xAB; 8192];
        let tail = vec![0xCD; 8192];
        let a = sparse_file(size, &head, b"first middle", &tail);
        let b = sparse_file(size, &head, b"other middle", &tail);

        let settings = FingerprintSettings::default();
        let fa = compute_fingerprint(a.path(), &settings).unwrap();
        let fb = compute_fingerprint(b.path(), &settings).unwrap();
        assert_eq!(fa.mode, FingerprintMode::Sampled);
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_sampled_fingerprint_covers_head_tail_and_size() {
        let size = 150 * MIB;
        let head = vec![1u8; 8192];
        let tail = vec![2u8; 8192];
        let file = sparse_file(size, &head, b"", &tail);

        let mut expected = Sha256::new();
        expected.update(&head);
        expected.update(&tail);
        expected.update(size.to_le_bytes());
        let expected = hex::encode(expected.finalize());

        let fp = compute_fingerprint(file.path(), &FingerprintSettings::default()).unwrap();
        assert_eq!(fp.value, expected);

        let other_tail = sparse_file(size, &head, b"", &[3u8; 8192]);
        let other = compute_fingerprint(other_tail.path(), &FingerprintSettings::default()).unwrap();
        assert_ne!(fp, other);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 4096]).unwrap();
        file.flush().unwrap();

        let settings = FingerprintSettings {
            sample_threshold_bytes: 1024,
            sample_window_bytes: 512,
        };
        let fp = compute_fingerprint(file.path(), &settings).unwrap();
        assert!(fp.is_sampled());
    }

    #[test]
    fn test_missing_file_is_filesystem_error() {
        let err = compute_fingerprint("/nonexistent/model.safetensors", &FingerprintSettings::default())
            .unwrap_err();
        assert!(matches!(err, ProvenanceError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_async_fingerprint_matches_sync() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 1024 * 1024]).unwrap();
        file.flush().unwrap();

        let fingerprinter = Fingerprinter::default();
        let async_fp = fingerprinter.fingerprint(file.path()).await.unwrap();
        let sync_fp = compute_fingerprint(file.path(), fingerprinter.settings()).unwrap();
        assert_eq!(async_fp, sync_fp);
    }
}
