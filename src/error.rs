//! Error types for the retrace engine
//!
//! This module defines all error types that can occur during engine
//! operations. The taxonomy separates fatal conditions (the catalog cannot
//! be opened) from per-operation and per-file conditions that workers
//! recover from and report in their run summaries.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the retrace library
pub type Result<T> = std::result::Result<T, RetraceError>;

/// Main error type for all retrace operations
#[derive(Debug, Error)]
pub enum RetraceError {
    /// The metadata catalog could not be opened or initialized.
    ///
    /// Fatal: the engine cannot operate without its source of truth.
    #[error("catalog unavailable at {path:?}: {reason}")]
    CatalogUnavailable {
        /// Path to the catalog database
        path: PathBuf,
        /// Why the catalog could not be opened
        reason: String,
    },

    /// A catalog query or write failed during an individual operation
    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    /// A content store filesystem operation failed
    ///
    /// Non-fatal per operation: callers log and continue.
    #[error("storage I/O error at {path:?}: {source}")]
    StorageIo {
        /// Blob path the operation touched
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A tracked file could not be read during a scan
    ///
    /// Non-fatal per file: the scan records the error and continues.
    #[error("cannot access {path:?}: {source}")]
    FileAccess {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A stored blob does not verify against the hash recorded for a version
    ///
    /// Blocks the requested deletion or restore; never silently resolved.
    #[error("hash mismatch - expected: {expected}, actual: {actual}")]
    HashMismatch {
        /// Hash recorded in the catalog
        expected: String,
        /// Hash recomputed from the stored blob, or "missing" if the blob is gone
        actual: String,
    },

    /// Version id not present in the catalog
    #[error("version not found: {0}")]
    VersionNotFound(i64),

    /// File record not present in the catalog
    #[error("file record not found: {0}")]
    FileNotFound(i64),

    /// Requested blob is not present in the content store
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// An exclusion pattern could not be compiled
    #[error("invalid exclusion pattern: {0}")]
    InvalidPattern(String),

    /// I/O errors outside the content store and tracked files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("internal error: {0}")]
    Internal(String),
}

impl RetraceError {
    /// Create a storage error for a blob path
    pub fn storage_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RetraceError::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// Create a file access error for a tracked path
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RetraceError::FileAccess {
            path: path.into(),
            source,
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        RetraceError::Internal(msg.into())
    }

    /// Check if this error is fatal to the engine as a whole
    ///
    /// Fatal errors abort startup; everything else is recovered at the
    /// operation boundary and surfaced as a typed result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RetraceError::CatalogUnavailable { .. })
    }

    /// Check if this error indicates store corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RetraceError::HashMismatch { .. } | RetraceError::BlobNotFound(_)
        )
    }
}
