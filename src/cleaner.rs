//! Retention and cleanup sweeps over the catalog and content store
//!
//! The cleaner applies the injected retention policy, removes file records
//! that are no longer reachable from any tracked item, prunes versions
//! whose backing blob is unrecoverable, reclaims orphan blobs, and finally
//! deletes file records left with zero versions. Orphanhood is always the
//! recomputed set difference between blobs on disk and hashes referenced
//! by version rows.
//!
//! The sweep observes cancellation between units of work (one file record,
//! one version, one blob) and ends with exactly one terminal summary.
//! Per-blob deletion failures are logged detail lines, never a failure of
//! the whole sweep.

use crate::cancel::CancelToken;
use crate::catalog::Catalog;
use crate::config::RetentionPolicy;
use crate::error::Result;
use crate::scanner::Coverage;
use crate::store::ContentStore;
use crate::types::{CleanupSummary, EngineEvent, FileIssue, RunOutcome, TrackedItem};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Whether a sweep step ran to completion or saw cancellation
enum StepEnd {
    Completed,
    Cancelled,
}

/// The background retention/cleanup worker
///
/// Stateless between runs, like the scanner; the engine's worker slot
/// guarantees at most one sweep at a time.
pub struct RetentionCleaner {
    catalog: Arc<Catalog>,
    store: Arc<ContentStore>,
    events: Sender<EngineEvent>,
}

impl RetentionCleaner {
    /// Create a cleaner over the shared catalog and store
    pub fn new(catalog: Arc<Catalog>, store: Arc<ContentStore>, events: Sender<EngineEvent>) -> Self {
        RetentionCleaner {
            catalog,
            store,
            events,
        }
    }

    /// Run one sweep
    ///
    /// Steps, in order: retention pruning, unreachable-record removal,
    /// unrecoverable-version pruning, orphan blob reclamation, empty-record
    /// cascade. Cancellation between units ends the run as
    /// [`RunOutcome::Interrupted`]; a sweep that removed nothing reports
    /// [`RunOutcome::NothingToDo`].
    pub fn run(
        &self,
        items: &[TrackedItem],
        policy: &RetentionPolicy,
        cancel: &CancelToken,
    ) -> CleanupSummary {
        let started = Instant::now();
        let _ = self.events.send(EngineEvent::CleanupStarted);

        let mut summary = CleanupSummary {
            outcome: RunOutcome::Finished,
            stale_versions_pruned: 0,
            files_removed: 0,
            versions_removed: 0,
            unrecoverable_pruned: 0,
            blobs_reclaimed: 0,
            bytes_reclaimed: 0,
            issues: Vec::new(),
            duration_ms: 0,
        };

        match self.sweep(items, policy, cancel, &mut summary) {
            Ok(StepEnd::Completed) => {
                if summary.is_noop() {
                    info!("cleanup sweep found nothing to delete");
                    summary.outcome = RunOutcome::NothingToDo;
                } else {
                    info!(
                        "cleanup removed {} files, {} versions, reclaimed {} blobs",
                        summary.files_removed, summary.versions_removed, summary.blobs_reclaimed
                    );
                }
            }
            Ok(StepEnd::Cancelled) => {
                info!("cleanup sweep interrupted");
                summary.outcome = RunOutcome::Interrupted;
            }
            Err(e) => {
                warn!("cleanup sweep failed: {}", e);
                summary.outcome = RunOutcome::Failed(e.to_string());
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        let _ = self
            .events
            .send(EngineEvent::CleanupFinished(summary.clone()));
        summary
    }

    /// The sweep body; fatal catalog errors bubble up as `Err`
    fn sweep(
        &self,
        items: &[TrackedItem],
        policy: &RetentionPolicy,
        cancel: &CancelToken,
        summary: &mut CleanupSummary,
    ) -> Result<StepEnd> {
        // Retention policy first, so the later passes see the post-policy
        // state of the catalog.
        if policy.is_active() {
            summary.stale_versions_pruned = self.catalog.delete_stale_versions(policy)?;
        }

        if let StepEnd::Cancelled = self.remove_unreachable_files(items, cancel, summary)? {
            return Ok(StepEnd::Cancelled);
        }
        if let StepEnd::Cancelled = self.prune_unrecoverable_versions(cancel, summary)? {
            return Ok(StepEnd::Cancelled);
        }
        if let StepEnd::Cancelled = self.reclaim_orphan_blobs(cancel, summary)? {
            return Ok(StepEnd::Cancelled);
        }

        let removed = self.catalog.prune_empty_files()?;
        summary.files_removed += removed.len();

        Ok(StepEnd::Completed)
    }

    /// Step 1: delete records no longer reachable from any tracked item
    ///
    /// Unreachable means not covered by the configured items (the item was
    /// removed or the path is excluded now) or confirmed gone from disk.
    fn remove_unreachable_files(
        &self,
        items: &[TrackedItem],
        cancel: &CancelToken,
        summary: &mut CleanupSummary,
    ) -> Result<StepEnd> {
        let coverage = Coverage::new(items);
        let files = self.catalog.list_files()?;

        for file in files {
            if cancel.is_cancelled() {
                return Ok(StepEnd::Cancelled);
            }
            let covered = coverage.covering_item(&file.path).is_some();
            let on_disk = file.path.exists();
            if covered && on_disk {
                continue;
            }

            debug!(
                "removing unreachable record {:?} (covered: {}, on disk: {})",
                file.path, covered, on_disk
            );
            match self.catalog.delete_file_and_versions(file.id) {
                Ok((_, versions)) => {
                    summary.files_removed += 1;
                    summary.versions_removed += versions;
                }
                Err(e) => {
                    warn!("could not remove record {:?}: {}", file.path, e);
                    summary.issues.push(FileIssue {
                        path: file.path,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(StepEnd::Completed)
    }

    /// Step 2: prune versions whose backing blob fails verification
    ///
    /// These versions are unrecoverable (their content is gone or damaged)
    /// and are counted separately from normal pruning.
    fn prune_unrecoverable_versions(
        &self,
        cancel: &CancelToken,
        summary: &mut CleanupSummary,
    ) -> Result<StepEnd> {
        let versions = self.catalog.list_all_versions()?;

        for version in versions {
            if cancel.is_cancelled() {
                return Ok(StepEnd::Cancelled);
            }
            if self.store.verify(&version.content_hash, version.size) {
                continue;
            }
            warn!(
                "version {} has no recoverable blob ({}), pruning",
                version.id,
                &version.content_hash[..8.min(version.content_hash.len())]
            );
            match self.catalog.remove_version_record(version.id) {
                Ok(()) => summary.unrecoverable_pruned += 1,
                Err(e) => summary.issues.push(FileIssue {
                    path: self.store.object_path(&version.content_hash),
                    message: format!("pruning version {}: {}", version.id, e),
                }),
            }
        }
        Ok(StepEnd::Completed)
    }

    /// Step 3: reclaim blobs with zero referencing versions
    ///
    /// Per-blob failures are logged and do not stop the sweep; the system
    /// must never crash because one orphan could not be removed.
    fn reclaim_orphan_blobs(
        &self,
        cancel: &CancelToken,
        summary: &mut CleanupSummary,
    ) -> Result<StepEnd> {
        let orphans = self.catalog.find_orphan_blob_hashes(&self.store)?;

        for hash in orphans {
            if cancel.is_cancelled() {
                return Ok(StepEnd::Cancelled);
            }
            let size = self.store.blob_size(&hash).unwrap_or(0);
            match self.store.delete(&hash) {
                Ok(()) => {
                    summary.blobs_reclaimed += 1;
                    summary.bytes_reclaimed += size;
                }
                Err(e) => {
                    warn!(
                        "could not reclaim orphan {}: {}",
                        &hash[..8.min(hash.len())],
                        e
                    );
                    summary.issues.push(FileIssue {
                        path: self.store.object_path(&hash),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(StepEnd::Completed)
    }
}
