//! Core data types used throughout the retrace engine
//!
//! The types in this module represent:
//! - **Catalog rows**: [`TrackedItem`], [`FileRecord`], [`Version`]
//! - **Run results**: [`RunOutcome`], [`ScanSummary`], [`CleanupSummary`]
//! - **Events**: [`EngineEvent`], the closed set of variants background
//!   workers emit for the presentation layer
//! - **Watcher boundary**: [`WatchEvent`], the external change stream the
//!   engine consumes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of a user-configured watched item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A single watched file
    File,
    /// A watched folder, scanned recursively
    Folder,
}

impl ItemKind {
    /// Catalog column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        }
    }

    /// Parse the catalog column representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(ItemKind::File),
            "folder" => Some(ItemKind::Folder),
            _ => None,
        }
    }
}

/// A watched file or folder as configured by the user
///
/// This is the configuration-level shape; once registered with the catalog
/// it gains a row id and becomes a [`TrackedItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedItem {
    /// Absolute path of the watched file or folder
    pub path: PathBuf,
    /// Whether the path is a file or a folder
    pub kind: ItemKind,
    /// Exclusion patterns (globs or plain substrings), folders only
    #[serde(default)]
    pub exclusions: Vec<String>,
}

impl WatchedItem {
    /// Convenience constructor for a watched file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        WatchedItem {
            path: path.into(),
            kind: ItemKind::File,
            exclusions: Vec::new(),
        }
    }

    /// Convenience constructor for a watched folder
    pub fn folder(path: impl Into<PathBuf>, exclusions: Vec<String>) -> Self {
        WatchedItem {
            path: path.into(),
            kind: ItemKind::Folder,
            exclusions,
        }
    }
}

/// A watched item as registered in the metadata catalog
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedItem {
    /// Catalog row id
    pub id: i64,
    /// Absolute path of the watched file or folder
    pub path: PathBuf,
    /// Whether the path is a file or a folder
    pub kind: ItemKind,
    /// Exclusion patterns, folders only
    pub exclusions: Vec<String>,
}

/// One concrete on-disk file known to the engine
///
/// Invariant: at most one record per distinct absolute path. The `item_id`
/// back-reference points at the tracked item the file was discovered under;
/// it is informational, not ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Catalog row id
    pub id: i64,
    /// Absolute path of the file
    pub path: PathBuf,
    /// Tracked item the file was discovered under, if still registered
    pub item_id: Option<i64>,
    /// Content hash of the most recent version
    pub last_hash: Option<String>,
    /// Size observed when the most recent version was recorded
    pub last_size: Option<u64>,
    /// Modification time observed when the most recent version was recorded
    pub last_mtime: Option<DateTime<Utc>>,
}

/// An immutable content snapshot of a file at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// Catalog row id
    pub id: i64,
    /// Owning file record id
    pub file_id: i64,
    /// When the snapshot was recorded
    pub created_at: DateTime<Utc>,
    /// SHA-256 hex digest of the content
    pub content_hash: String,
    /// Content size in bytes
    pub size: u64,
    /// Human annotation, e.g. "restored"
    pub note: Option<String>,
}

/// Terminal state of a background run
///
/// Every scan and cleanup run ends in exactly one of these. `Interrupted`
/// is a normal outcome, distinct from `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The run processed its whole work list
    Finished,
    /// There was no work to do (e.g. zero configured paths)
    NothingToDo,
    /// Cancellation was observed between units of work
    Interrupted,
    /// An unexpected fatal error ended the run
    Failed(String),
}

impl RunOutcome {
    /// Whether the run ended without doing all of its work
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, RunOutcome::Finished | RunOutcome::NothingToDo)
    }
}

/// A per-file problem recorded during a run
///
/// These are detail lines in the run summary, never failures of the whole
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileIssue {
    /// Path the problem occurred on
    pub path: PathBuf,
    /// Human-readable description
    pub message: String,
}

/// Result of a scanner run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Candidate files examined
    pub files_seen: usize,
    /// New file records created
    pub files_tracked: usize,
    /// New versions recorded for already-tracked files
    pub versions_saved: usize,
    /// Bytes written to the content store (deduplicated writes only)
    pub bytes_stored: u64,
    /// Per-file problems encountered along the way
    pub issues: Vec<FileIssue>,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
}

impl ScanSummary {
    /// Whether the run changed anything
    pub fn has_changes(&self) -> bool {
        self.files_tracked > 0 || self.versions_saved > 0
    }
}

/// Result of a retention/cleanup run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupSummary {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Versions pruned by the retention policy
    pub stale_versions_pruned: usize,
    /// File records removed (unreachable or emptied of versions)
    pub files_removed: usize,
    /// Versions removed together with unreachable file records
    pub versions_removed: usize,
    /// Versions pruned because their backing blob failed verification
    pub unrecoverable_pruned: usize,
    /// Orphan blobs reclaimed from the content store
    pub blobs_reclaimed: usize,
    /// Bytes reclaimed by orphan deletion
    pub bytes_reclaimed: u64,
    /// Per-item problems encountered along the way
    pub issues: Vec<FileIssue>,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
}

impl CleanupSummary {
    /// Whether the sweep removed anything at all
    pub fn is_noop(&self) -> bool {
        self.stale_versions_pruned == 0
            && self.files_removed == 0
            && self.versions_removed == 0
            && self.unrecoverable_pruned == 0
            && self.blobs_reclaimed == 0
    }
}

/// Events emitted by background workers for the presentation layer
///
/// A closed set of tagged variants with structured fields; the presentation
/// layer formats them uniformly. Bursts of fine-grained events are expected
/// and coalesced by the notification aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A scanner run started
    ScanStarted,
    /// A previously unknown file is now tracked
    FileTracked {
        /// Path of the new file
        path: PathBuf,
    },
    /// A new version was preserved for an already-tracked file
    VersionSaved {
        /// Path of the changed file
        path: PathBuf,
        /// Size of the new version in bytes
        size: u64,
    },
    /// A scanner run ended; carries the single terminal summary
    ScanFinished(ScanSummary),
    /// A cleanup run started
    CleanupStarted,
    /// A cleanup run ended; carries the single terminal summary
    CleanupFinished(CleanupSummary),
    /// A version was restored over its original path
    VersionRestored {
        /// Path that was overwritten
        path: PathBuf,
    },
    /// A version was deleted on user request
    VersionDeleted {
        /// Path of the owning file
        path: PathBuf,
        /// Whether the file record went away with its last version
        file_removed: bool,
    },
    /// File records were removed from the catalog
    FilesForgotten {
        /// Paths of the removed records
        paths: Vec<PathBuf>,
    },
    /// A plain notification outside any worker run
    Notice {
        /// Message text
        message: String,
    },
}

/// Kind of a filesystem change reported by the external watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventKind {
    /// Path was created
    Created,
    /// Path contents were modified
    Modified,
    /// Path was removed
    Removed,
}

/// A filesystem change event consumed from the external watcher
///
/// The OS-level watch primitive itself is outside the engine; only this
/// stream is consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Absolute path the event refers to
    pub path: PathBuf,
    /// What happened to the path
    pub kind: WatchEventKind,
}

/// Disposition of a run request made against a busy worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    /// A new worker run was started
    Started,
    /// A run is already active; the request was queued to run after it
    Coalesced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_kind_round_trip() {
        assert_eq!(ItemKind::parse("file"), Some(ItemKind::File));
        assert_eq!(ItemKind::parse("folder"), Some(ItemKind::Folder));
        assert_eq!(ItemKind::parse("link"), None);
        assert_eq!(ItemKind::Folder.as_str(), "folder");
    }

    #[test]
    fn test_cleanup_summary_noop() {
        let summary = CleanupSummary {
            outcome: RunOutcome::Finished,
            stale_versions_pruned: 0,
            files_removed: 0,
            versions_removed: 0,
            unrecoverable_pruned: 0,
            blobs_reclaimed: 0,
            bytes_reclaimed: 0,
            issues: vec![],
            duration_ms: 0,
        };
        assert!(summary.is_noop());
    }

    #[test]
    fn test_run_outcome_classification() {
        assert!(RunOutcome::Finished.is_terminal_success());
        assert!(RunOutcome::NothingToDo.is_terminal_success());
        assert!(!RunOutcome::Interrupted.is_terminal_success());
        assert!(!RunOutcome::Failed("x".into()).is_terminal_success());
    }
}
