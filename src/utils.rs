//! Utility functions shared across the retrace engine
//!
//! Hashing helpers, atomic writes, and byte formatting. All functions are
//! thread-safe and can be called concurrently.

use crate::error::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Hash a file's content efficiently using SHA-256
///
/// Streams the file in 64KB chunks so large files never have to fit in
/// memory. Returns the hex digest and the number of bytes hashed.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn hash_file_content(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut total: u64 = 0;

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

/// Hash arbitrary data using SHA-256
///
/// Returns the hash as a 64-character hexadecimal string. Same data always
/// produces the same hash.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Atomic file write (write to a temp file then rename)
///
/// The target file is never observable in a partially written state. The
/// temp file is created in the target's parent directory so the final
/// rename stays on one filesystem.
///
/// # Errors
///
/// Returns an I/O error if the temp file cannot be created or the rename
/// fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, content)?;
    tmp.persist(path)
        .map_err(|e| crate::error::RetraceError::Io(e.error))?;
    Ok(())
}

/// Format a byte count for display using binary units
///
/// Values below 1024 bytes are shown whole with "B"; larger values get one
/// decimal place and KB/MB/GB.
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KIB {
        format!("{} B", bytes)
    } else if size < KIB * KIB {
        format!("{:.1} KB", size / KIB)
    } else if size < KIB * KIB * KIB {
        format!("{:.1} MB", size / (KIB * KIB))
    } else {
        format!("{:.1} GB", size / (KIB * KIB * KIB))
    }
}

/// Modification time of a path as a UTC timestamp, if available
pub fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_data_deterministic() {
        let a = hash_data(b"hello");
        let b = hash_data(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_data(b"world"));
    }

    #[test]
    fn test_hash_file_matches_hash_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, b"some content").unwrap();

        let (hash, size) = hash_file_content(&path).unwrap();
        assert_eq!(hash, hash_data(b"some content"));
        assert_eq!(size, 12);
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
