//! Background scanner: walks tracked items and preserves changed content
//!
//! The scanner turns a set of tracked items (or a batch of changed paths
//! reported by the external watcher) into catalog and content-store
//! mutations. Per candidate file it compares the current content hash with
//! the last one the catalog knows, and only on a mismatch does it write a
//! blob and insert a version row.
//!
//! Runs are cancellable between files, never mid-write: a partially
//! written blob is never referenced by a committed version row, and a
//! version row is never committed without its blob already durably
//! written. Per-file read failures are recorded in the run summary and the
//! scan continues; only losing the catalog itself fails a run.

use crate::cancel::CancelToken;
use crate::catalog::Catalog;
use crate::error::{Result, RetraceError};
use crate::store::ContentStore;
use crate::types::{
    EngineEvent, FileIssue, ItemKind, RunOutcome, ScanSummary, TrackedItem,
};
use crate::utils::{file_mtime, hash_data};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Progress report passed to the optional scan callback after each file
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Files processed so far in this run
    pub processed: usize,
    /// File the scanner just finished with
    pub path: PathBuf,
}

/// Callback signature for per-file scan progress
pub type ProgressFn = dyn Fn(&ScanProgress) + Send + Sync;

/// Compiled exclusion patterns for one watched folder
///
/// Patterns that parse as globs are matched against the path relative to
/// the folder root; anything else falls back to a plain substring check on
/// the absolute path.
pub(crate) struct ExclusionSet {
    globs: GlobSet,
    substrings: Vec<String>,
}

impl ExclusionSet {
    pub(crate) fn new(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut substrings = Vec::new();

        for pattern in patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    // A bare directory name should also cover everything
                    // beneath it.
                    if !pattern.contains("**") {
                        if let Ok(glob) = Glob::new(&format!("{}/**", pattern)) {
                            builder.add(glob);
                        }
                    }
                }
                Err(e) => {
                    debug!("treating exclusion {:?} as substring: {}", pattern, e);
                    substrings.push(pattern.clone());
                }
            }
        }

        let globs = builder.build().unwrap_or_else(|e| {
            warn!("exclusion set failed to compile, ignoring globs: {}", e);
            GlobSet::empty()
        });
        ExclusionSet { globs, substrings }
    }

    pub(crate) fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        if let Ok(relative) = path.strip_prefix(root) {
            if self.globs.is_match(relative) {
                return true;
            }
        }
        let full = path.to_string_lossy();
        self.substrings.iter().any(|s| full.contains(s.as_str()))
    }
}

/// Reachability index over the configured tracked items
///
/// Maps a concrete path to the item it is covered by, honoring per-folder
/// exclusions. Shared by the scanner (incremental triage) and the cleaner
/// (unreachable-record detection).
pub(crate) struct Coverage {
    entries: Vec<(TrackedItem, ExclusionSet)>,
}

impl Coverage {
    pub(crate) fn new(items: &[TrackedItem]) -> Self {
        let entries = items
            .iter()
            .cloned()
            .map(|item| {
                let exclusions = ExclusionSet::new(&item.exclusions);
                (item, exclusions)
            })
            .collect();
        Coverage { entries }
    }

    /// The id of the tracked item covering `path`, if any
    pub(crate) fn covering_item(&self, path: &Path) -> Option<i64> {
        for (item, exclusions) in &self.entries {
            match item.kind {
                ItemKind::File => {
                    if item.path == path {
                        return Some(item.id);
                    }
                }
                ItemKind::Folder => {
                    if path.starts_with(&item.path) && !exclusions.is_excluded(&item.path, path) {
                        return Some(item.id);
                    }
                }
            }
        }
        None
    }
}

/// A path the scanner should examine, with its owning item
struct Candidate {
    path: PathBuf,
    item_id: i64,
}

/// What processing one candidate file amounted to
enum Disposition {
    /// A previously unknown file is now tracked
    NewFile { size: u64, stored: u64 },
    /// A new version was recorded for a known file
    NewVersion { size: u64, stored: u64 },
    /// Content unchanged since the last recorded version
    Unchanged,
    /// Path vanished before it could be read
    Missing,
}

/// The background scanner
///
/// Stateless between runs; all durable state lives in the catalog and the
/// content store. One run executes at a time (the engine's worker slot
/// enforces this).
pub struct Scanner {
    catalog: Arc<Catalog>,
    store: Arc<ContentStore>,
    events: Sender<EngineEvent>,
}

impl Scanner {
    /// Create a scanner over the shared catalog and store
    pub fn new(catalog: Arc<Catalog>, store: Arc<ContentStore>, events: Sender<EngineEvent>) -> Self {
        Scanner {
            catalog,
            store,
            events,
        }
    }

    /// Run a full sweep over every configured tracked item
    ///
    /// A run with zero configured items is a no-op reported as
    /// [`RunOutcome::NothingToDo`], not an error. Cancellation observed
    /// between files ends the run as [`RunOutcome::Interrupted`].
    pub fn run_full(
        &self,
        items: &[TrackedItem],
        cancel: &CancelToken,
        progress: Option<&ProgressFn>,
    ) -> ScanSummary {
        let started = Instant::now();
        let _ = self.events.send(EngineEvent::ScanStarted);

        if items.is_empty() {
            info!("nothing to scan: no tracked items configured");
            return self.finish(ScanSummary {
                outcome: RunOutcome::NothingToDo,
                files_seen: 0,
                files_tracked: 0,
                versions_saved: 0,
                bytes_stored: 0,
                issues: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let mut issues = Vec::new();
        let candidates = self.collect_candidates(items, &mut issues);
        debug!("full scan over {} candidate files", candidates.len());
        self.process(candidates, issues, cancel, progress, started)
    }

    /// Run an incremental scan over paths the watcher reported as changed
    ///
    /// Paths outside the tracked scope (or excluded) are skipped quietly;
    /// the watcher sees more of the world than the engine tracks.
    pub fn run_incremental(
        &self,
        items: &[TrackedItem],
        changed: &[PathBuf],
        cancel: &CancelToken,
        progress: Option<&ProgressFn>,
    ) -> ScanSummary {
        let started = Instant::now();
        let _ = self.events.send(EngineEvent::ScanStarted);

        let coverage = Coverage::new(items);
        let mut seen = std::collections::HashSet::new();
        let candidates: Vec<Candidate> = changed
            .iter()
            .filter(|p| seen.insert((*p).clone()))
            .filter_map(|path| match coverage.covering_item(path) {
                Some(item_id) => Some(Candidate {
                    path: path.clone(),
                    item_id,
                }),
                None => {
                    trace!("ignoring change outside tracked scope: {:?}", path);
                    None
                }
            })
            .collect();

        if candidates.is_empty() {
            return self.finish(ScanSummary {
                outcome: RunOutcome::NothingToDo,
                files_seen: 0,
                files_tracked: 0,
                versions_saved: 0,
                bytes_stored: 0,
                issues: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        debug!("incremental scan over {} changed paths", candidates.len());
        self.process(candidates, Vec::new(), cancel, progress, started)
    }

    /// Enumerate candidate files under the tracked items
    fn collect_candidates(&self, items: &[TrackedItem], issues: &mut Vec<FileIssue>) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for item in items {
            match item.kind {
                ItemKind::File => candidates.push(Candidate {
                    path: item.path.clone(),
                    item_id: item.id,
                }),
                ItemKind::Folder => {
                    let exclusions = ExclusionSet::new(&item.exclusions);
                    for entry in walkdir::WalkDir::new(&item.path).follow_links(false) {
                        let entry = match entry {
                            Ok(entry) => entry,
                            Err(e) => {
                                warn!("walk error under {:?}: {}", item.path, e);
                                issues.push(FileIssue {
                                    path: e
                                        .path()
                                        .map(Path::to_path_buf)
                                        .unwrap_or_else(|| item.path.clone()),
                                    message: e.to_string(),
                                });
                                continue;
                            }
                        };
                        if !entry.file_type().is_file() {
                            continue;
                        }
                        if exclusions.is_excluded(&item.path, entry.path()) {
                            trace!("excluded from scan: {:?}", entry.path());
                            continue;
                        }
                        candidates.push(Candidate {
                            path: entry.path().to_path_buf(),
                            item_id: item.id,
                        });
                    }
                }
            }
        }

        candidates
    }

    /// Process candidates one at a time, observing cancellation between files
    fn process(
        &self,
        candidates: Vec<Candidate>,
        mut issues: Vec<FileIssue>,
        cancel: &CancelToken,
        progress: Option<&ProgressFn>,
        started: Instant,
    ) -> ScanSummary {
        let mut summary = ScanSummary {
            outcome: RunOutcome::Finished,
            files_seen: 0,
            files_tracked: 0,
            versions_saved: 0,
            bytes_stored: 0,
            issues: Vec::new(),
            duration_ms: 0,
        };

        for candidate in candidates {
            if cancel.is_cancelled() {
                info!("scan interrupted after {} files", summary.files_seen);
                summary.outcome = RunOutcome::Interrupted;
                break;
            }

            match self.process_one(&candidate) {
                Ok(Disposition::NewFile { size, stored }) => {
                    summary.files_seen += 1;
                    summary.files_tracked += 1;
                    summary.bytes_stored += stored;
                    let _ = self.events.send(EngineEvent::FileTracked {
                        path: candidate.path.clone(),
                    });
                    trace!("tracked new file {:?} ({} bytes)", candidate.path, size);
                }
                Ok(Disposition::NewVersion { size, stored }) => {
                    summary.files_seen += 1;
                    summary.versions_saved += 1;
                    summary.bytes_stored += stored;
                    let _ = self.events.send(EngineEvent::VersionSaved {
                        path: candidate.path.clone(),
                        size,
                    });
                }
                Ok(Disposition::Unchanged) => {
                    summary.files_seen += 1;
                }
                Ok(Disposition::Missing) => {
                    debug!("skipping vanished path {:?}", candidate.path);
                }
                Err(e @ RetraceError::CatalogUnavailable { .. }) => {
                    warn!("scan failed: {}", e);
                    summary.outcome = RunOutcome::Failed(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!("error processing {:?}: {}", candidate.path, e);
                    issues.push(FileIssue {
                        path: candidate.path.clone(),
                        message: e.to_string(),
                    });
                }
            }

            if let Some(callback) = progress {
                callback(&ScanProgress {
                    processed: summary.files_seen,
                    path: candidate.path,
                });
            }
        }

        summary.issues = issues;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        self.finish(summary)
    }

    /// Hash one file and persist a version if its content changed
    ///
    /// Hashing and the blob write happen outside any catalog transaction;
    /// only the final row mutation is transactional.
    fn process_one(&self, candidate: &Candidate) -> Result<Disposition> {
        let path = &candidate.path;
        if !path.exists() {
            return Ok(Disposition::Missing);
        }

        let metadata = fs::metadata(path).map_err(|e| RetraceError::file_access(path, e))?;
        let size = metadata.len();
        let mtime = file_mtime(path);

        let record = self.catalog.find_file(path)?;

        // Cheap compare: identical size and mtime means the content cannot
        // have changed under any editor that bumps mtime. Any doubt falls
        // through to the hash.
        if let Some(record) = &record {
            if record.last_size == Some(size)
                && mtime.is_some()
                && record.last_mtime == mtime
            {
                return Ok(Disposition::Unchanged);
            }
        }

        let bytes = fs::read(path).map_err(|e| RetraceError::file_access(path, e))?;
        let hash = hash_data(&bytes);

        if let Some(record) = &record {
            if record.last_hash.as_deref() == Some(hash.as_str()) {
                self.catalog.touch_file(record.id, size, mtime)?;
                return Ok(Disposition::Unchanged);
            }
        }

        let already_stored = self.store.exists(&hash);
        let hash = self.store.put(&bytes)?;
        let stored = if already_stored { 0 } else { size };

        let recorded = self.catalog.record_observation(
            path,
            Some(candidate.item_id),
            &hash,
            size,
            mtime,
            None,
        )?;

        if recorded.newly_tracked {
            Ok(Disposition::NewFile { size, stored })
        } else {
            Ok(Disposition::NewVersion { size, stored })
        }
    }

    /// Emit the single terminal summary event and hand the summary back
    fn finish(&self, summary: ScanSummary) -> ScanSummary {
        let _ = self.events.send(EngineEvent::ScanFinished(summary.clone()));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusions_glob_and_substring() {
        let set = ExclusionSet::new(&["*.tmp".to_string(), "build".to_string()]);
        let root = Path::new("/watch");

        assert!(set.is_excluded(root, Path::new("/watch/scratch.tmp")));
        assert!(set.is_excluded(root, Path::new("/watch/build/out.bin")));
        assert!(!set.is_excluded(root, Path::new("/watch/src/main.rs")));
    }

    #[test]
    fn test_coverage_honors_kind_and_exclusions() {
        let items = vec![
            TrackedItem {
                id: 1,
                path: PathBuf::from("/docs/notes.txt"),
                kind: ItemKind::File,
                exclusions: vec![],
            },
            TrackedItem {
                id: 2,
                path: PathBuf::from("/project"),
                kind: ItemKind::Folder,
                exclusions: vec!["target".to_string()],
            },
        ];
        let coverage = Coverage::new(&items);

        assert_eq!(coverage.covering_item(Path::new("/docs/notes.txt")), Some(1));
        assert_eq!(coverage.covering_item(Path::new("/docs/other.txt")), None);
        assert_eq!(coverage.covering_item(Path::new("/project/src/lib.rs")), Some(2));
        assert_eq!(coverage.covering_item(Path::new("/project/target/debug/x")), None);
        assert_eq!(coverage.covering_item(Path::new("/elsewhere/file")), None);
    }
}
