//! Content-addressable blob storage
//!
//! This module provides the content store for retrace: a deduplicated,
//! hash-addressed object store holding one physical blob per distinct
//! content hash.
//!
//! ## Layout
//!
//! The store uses a sharded directory structure so no single directory
//! grows unbounded:
//!
//! ```text
//! store_root/
//! └── objects/
//!     └── <prefix>/          # First 2 chars of the SHA-256 hex digest
//!         └── <suffix>       # Remaining 62 chars
//! ```
//!
//! ## Content addressing
//!
//! Blobs are identified by the SHA-256 hash of their bytes and stored
//! verbatim: the physical file's content always hashes back to its key,
//! which is what version integrity checks rely on. Writes are idempotent,
//! so storing identical content twice yields one blob, and concurrent
//! writes of the same hash cannot corrupt each other (each writer lands a
//! complete temp file and the rename is atomic).
//!
//! The store performs no bookkeeping of its own: which blobs are still
//! referenced is always derived from the metadata catalog, never counted
//! here.

use crate::error::{Result, RetraceError};
use crate::utils::hash_data;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Subdirectory of the store root holding the sharded blobs
const OBJECTS_DIR: &str = "objects";

/// Deduplicated, hash-addressed blob store
///
/// All operations are safe to call from multiple threads; the store holds
/// no in-memory state beyond its root path.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open a content store rooted at `root`, creating the directory
    /// structure on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RetraceError::StorageIo`] if the object directory cannot
    /// be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let objects = root.join(OBJECTS_DIR);
        fs::create_dir_all(&objects).map_err(|e| RetraceError::storage_io(&objects, e))?;
        debug!("content store ready at {:?}", root);
        Ok(ContentStore { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical path a blob with the given hash lives at
    ///
    /// The layout is stable within a store root: version rows reference
    /// blobs only by hash, never by path.
    pub fn object_path(&self, hash: &str) -> PathBuf {
        let (prefix, suffix) = hash.split_at(2.min(hash.len()));
        self.root.join(OBJECTS_DIR).join(prefix).join(suffix)
    }

    /// Store content, returning its SHA-256 hex digest
    ///
    /// Idempotent: if a blob for the computed hash already exists the write
    /// is skipped and the existing hash is returned (deduplication). New
    /// blobs are written to a temp file and atomically renamed into place,
    /// so a partially written blob is never observable under its hash.
    ///
    /// # Errors
    ///
    /// Returns [`RetraceError::StorageIo`] if the blob cannot be written.
    pub fn put(&self, content: &[u8]) -> Result<String> {
        let hash = hash_data(content);
        let path = self.object_path(&hash);

        if path.exists() {
            trace!("blob {} already present, skipping write", &hash[..8]);
            return Ok(hash);
        }

        let dir = path.parent().expect("object path always has a shard dir");
        fs::create_dir_all(dir).map_err(|e| RetraceError::storage_io(dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| RetraceError::storage_io(dir, e))?;
        std::io::Write::write_all(&mut tmp, content)
            .map_err(|e| RetraceError::storage_io(&path, e))?;

        match tmp.persist(&path) {
            Ok(_) => {
                trace!("stored blob {} ({} bytes)", &hash[..8], content.len());
            }
            Err(e) if path.exists() => {
                // A concurrent writer landed the identical blob first.
                trace!("blob {} raced into place: {}", &hash[..8], e.error);
            }
            Err(e) => return Err(RetraceError::storage_io(&path, e.error)),
        }

        Ok(hash)
    }

    /// Check whether a blob exists for the given hash
    pub fn exists(&self, hash: &str) -> bool {
        self.object_path(hash).exists()
    }

    /// Read a blob's bytes
    ///
    /// # Errors
    ///
    /// Returns [`RetraceError::BlobNotFound`] if no blob exists for the
    /// hash, or [`RetraceError::StorageIo`] if reading fails.
    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.object_path(hash);
        if !path.exists() {
            return Err(RetraceError::BlobNotFound(hash.to_string()));
        }
        fs::read(&path).map_err(|e| RetraceError::storage_io(&path, e))
    }

    /// Remove the physical blob for a hash
    ///
    /// Callers treat failures as non-fatal: a single orphan that cannot be
    /// removed must never crash a sweep.
    ///
    /// # Errors
    ///
    /// Returns [`RetraceError::StorageIo`] if the filesystem removal fails.
    pub fn delete(&self, hash: &str) -> Result<()> {
        let path = self.object_path(hash);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path).map_err(|e| RetraceError::storage_io(&path, e))?;

        // Drop the shard directory once it empties out; best effort only.
        if let Some(shard) = path.parent() {
            if fs::read_dir(shard).map(|mut d| d.next().is_none()).unwrap_or(false) {
                let _ = fs::remove_dir(shard);
            }
        }

        debug!("deleted blob {}", &hash[..8.min(hash.len())]);
        Ok(())
    }

    /// Cheap pre-verification of a blob: existence and size
    ///
    /// Full hash re-verification is performed at the catalog layer before
    /// destructive operations; this check is the fast first gate.
    pub fn verify(&self, hash: &str, expected_size: u64) -> bool {
        match fs::metadata(self.object_path(hash)) {
            Ok(meta) => meta.len() == expected_size,
            Err(_) => false,
        }
    }

    /// Size of the blob stored for a hash, if present
    pub fn blob_size(&self, hash: &str) -> Option<u64> {
        fs::metadata(self.object_path(hash)).ok().map(|m| m.len())
    }

    /// Enumerate every hash with a physical blob in the store
    ///
    /// Used by orphan reclamation to compute the set difference against
    /// the catalog's referenced hashes. Entries that do not look like
    /// sharded hash files are skipped with a warning.
    pub fn iter_hashes(&self) -> Result<Vec<String>> {
        let objects = self.root.join(OBJECTS_DIR);
        let mut hashes = Vec::new();

        for shard in fs::read_dir(&objects).map_err(|e| RetraceError::storage_io(&objects, e))? {
            let shard = shard.map_err(|e| RetraceError::storage_io(&objects, e))?;
            if !shard.path().is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().to_string();
            if prefix.len() != 2 {
                warn!("unexpected entry in object store: {:?}", shard.path());
                continue;
            }
            for entry in
                fs::read_dir(shard.path()).map_err(|e| RetraceError::storage_io(shard.path(), e))?
            {
                let entry = entry.map_err(|e| RetraceError::storage_io(shard.path(), e))?;
                let suffix = entry.file_name().to_string_lossy().to_string();
                hashes.push(format!("{}{}", prefix, suffix));
            }
        }

        Ok(hashes)
    }
}
