//! The supervising engine
//!
//! Owns the catalog, the content store, and the two background worker
//! slots (scan and cleanup). Each job kind runs on a dedicated worker
//! thread with at most one active run; a request arriving while a run is
//! active is coalesced into a queued re-run, never a second concurrent
//! run. The engine also exposes the user-facing operations: restore,
//! export, preview, and deletion.
//!
//! All engine events flow out through a single channel; feed them through
//! [`crate::aggregator::route`] to get debounced, human-readable
//! notifications.

use crate::cancel::CancelToken;
use crate::catalog::{BatchDeleteOutcome, Catalog, DeletedVersion};
use crate::cleaner::RetentionCleaner;
use crate::config::EngineConfig;
use crate::error::{Result, RetraceError};
use crate::scanner::Scanner;
use crate::store::ContentStore;
use crate::types::{
    EngineEvent, RunOutcome, RunRequest, ScanSummary, Version, WatchEvent, WatchEventKind,
};
use crate::utils::{atomic_write, file_mtime, hash_data};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// File name of the catalog database under the data directory
const CATALOG_FILE: &str = "metadata.db";
/// Directory name of the content store under the data directory
const STORE_DIR: &str = "storage";

/// Work queued against the scanner slot while a run is active
#[derive(Debug, Clone)]
pub enum PendingScan {
    /// Sweep every configured tracked item
    Full,
    /// Re-examine specific changed paths
    Incremental(Vec<PathBuf>),
}

impl PendingScan {
    /// Coalesce two pending requests into one
    ///
    /// A full sweep subsumes any incremental batch; two incremental
    /// batches concatenate.
    fn merge(self, other: PendingScan) -> PendingScan {
        match (self, other) {
            (PendingScan::Incremental(mut a), PendingScan::Incremental(b)) => {
                a.extend(b);
                PendingScan::Incremental(a)
            }
            _ => PendingScan::Full,
        }
    }
}

/// State machine for one worker slot
///
/// Explicit, mutex-guarded state instead of ambient flags: a slot is
/// either idle or running, and a running slot can carry one queued
/// re-run request.
struct SlotState<Q> {
    running: bool,
    cancel: CancelToken,
    queued: Option<Q>,
    handle: Option<JoinHandle<()>>,
}

impl<Q> Default for SlotState<Q> {
    fn default() -> Self {
        SlotState {
            running: false,
            cancel: CancelToken::new(),
            queued: None,
            handle: None,
        }
    }
}

struct JobSlot<Q> {
    state: Mutex<SlotState<Q>>,
}

impl<Q> Default for JobSlot<Q> {
    fn default() -> Self {
        JobSlot {
            state: Mutex::new(SlotState::default()),
        }
    }
}

/// The version history engine
///
/// Create one per process with [`Engine::open`]; it is shared across
/// worker threads behind an `Arc`.
pub struct Engine {
    catalog: Arc<Catalog>,
    store: Arc<ContentStore>,
    config: Mutex<EngineConfig>,
    events: Sender<EngineEvent>,
    scan_slot: JobSlot<PendingScan>,
    cleanup_slot: JobSlot<()>,
    // Handle back to the owning Arc so worker threads can be spawned from
    // &self methods.
    weak_self: Weak<Engine>,
}

impl Engine {
    /// Open the engine over a data directory
    ///
    /// The directory holds the catalog database and the content store
    /// root; both are created on first use. The configured tracked items
    /// are registered with the catalog immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RetraceError::CatalogUnavailable`] if the catalog cannot
    /// be opened; this is fatal and reported upward.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        config: EngineConfig,
    ) -> Result<(Arc<Engine>, Receiver<EngineEvent>)> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let catalog = Arc::new(Catalog::open(data_dir.join(CATALOG_FILE))?);
        let store = Arc::new(ContentStore::open(data_dir.join(STORE_DIR))?);
        catalog.sync_tracked_items(&config.watched_items)?;

        let (events, receiver) = mpsc::channel();
        info!("engine ready over {:?}", data_dir);

        let engine = Arc::new_cyclic(|weak| Engine {
            catalog,
            store,
            config: Mutex::new(config),
            events,
            scan_slot: JobSlot::default(),
            cleanup_slot: JobSlot::default(),
            weak_self: weak.clone(),
        });
        Ok((engine, receiver))
    }

    /// The shared metadata catalog
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The shared content store
    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// A snapshot of the current configuration
    pub fn config(&self) -> EngineConfig {
        self.config.lock().clone()
    }

    /// Replace the configuration and re-register tracked items
    pub fn update_config(&self, config: EngineConfig) -> Result<()> {
        self.catalog.sync_tracked_items(&config.watched_items)?;
        *self.config.lock() = config;
        Ok(())
    }

    // ---- worker slots ------------------------------------------------------

    /// Request a full scan
    ///
    /// Starts the scanner worker, or queues a re-run if one is already
    /// active (the queued request subsumes any pending incremental batch).
    pub fn request_scan(&self) -> RunRequest {
        self.request_scan_mode(PendingScan::Full)
    }

    /// Request an incremental scan over specific changed paths
    pub fn request_incremental(&self, paths: Vec<PathBuf>) -> RunRequest {
        self.request_scan_mode(PendingScan::Incremental(paths))
    }

    fn request_scan_mode(&self, mode: PendingScan) -> RunRequest {
        let mut state = self.scan_slot.state.lock();
        if state.running {
            debug!("scan already active, coalescing request");
            state.queued = Some(match state.queued.take() {
                Some(previous) => previous.merge(mode),
                None => mode,
            });
            return RunRequest::Coalesced;
        }

        state.running = true;
        state.cancel = CancelToken::new();
        let cancel = state.cancel.clone();
        let engine = self.weak_self.upgrade().expect("engine is alive");
        state.handle = Some(
            thread::Builder::new()
                .name("retrace-scanner".to_string())
                .spawn(move || engine.scan_worker(mode, cancel))
                .expect("spawning the scanner thread"),
        );
        RunRequest::Started
    }

    fn scan_worker(self: Arc<Self>, mut mode: PendingScan, mut cancel: CancelToken) {
        loop {
            self.run_scan_once(&mode, &cancel);

            let mut state = self.scan_slot.state.lock();
            match state.queued.take() {
                Some(next) if !cancel.is_cancelled() => {
                    debug!("running coalesced scan request");
                    state.cancel = CancelToken::new();
                    cancel = state.cancel.clone();
                    mode = next;
                }
                _ => {
                    state.running = false;
                    break;
                }
            }
        }
    }

    fn run_scan_once(&self, mode: &PendingScan, cancel: &CancelToken) {
        let watched = self.config.lock().watched_items.clone();
        let items = match self.catalog.sync_tracked_items(&watched) {
            Ok(items) => items,
            Err(e) => {
                warn!("scan could not register tracked items: {}", e);
                let _ = self.events.send(EngineEvent::ScanFinished(ScanSummary {
                    outcome: RunOutcome::Failed(e.to_string()),
                    files_seen: 0,
                    files_tracked: 0,
                    versions_saved: 0,
                    bytes_stored: 0,
                    issues: Vec::new(),
                    duration_ms: 0,
                }));
                return;
            }
        };

        let scanner = Scanner::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.store),
            self.events.clone(),
        );
        match mode {
            PendingScan::Full => {
                scanner.run_full(&items, cancel, None);
            }
            PendingScan::Incremental(paths) => {
                scanner.run_incremental(&items, paths, cancel, None);
            }
        }
    }

    /// Request a cleanup sweep
    ///
    /// Same exclusivity discipline as scanning: one active sweep, later
    /// requests coalesce into a single queued re-run.
    pub fn request_cleanup(&self) -> RunRequest {
        let mut state = self.cleanup_slot.state.lock();
        if state.running {
            debug!("cleanup already active, coalescing request");
            state.queued = Some(());
            return RunRequest::Coalesced;
        }

        state.running = true;
        state.cancel = CancelToken::new();
        let cancel = state.cancel.clone();
        let engine = self.weak_self.upgrade().expect("engine is alive");
        state.handle = Some(
            thread::Builder::new()
                .name("retrace-cleaner".to_string())
                .spawn(move || engine.cleanup_worker(cancel))
                .expect("spawning the cleaner thread"),
        );
        RunRequest::Started
    }

    fn cleanup_worker(self: Arc<Self>, mut cancel: CancelToken) {
        loop {
            let (watched, policy) = {
                let config = self.config.lock();
                (config.watched_items.clone(), config.retention)
            };
            match self.catalog.sync_tracked_items(&watched) {
                Ok(items) => {
                    let cleaner = RetentionCleaner::new(
                        Arc::clone(&self.catalog),
                        Arc::clone(&self.store),
                        self.events.clone(),
                    );
                    cleaner.run(&items, &policy, &cancel);
                }
                Err(e) => warn!("cleanup could not register tracked items: {}", e),
            }

            let mut state = self.cleanup_slot.state.lock();
            match state.queued.take() {
                Some(()) if !cancel.is_cancelled() => {
                    state.cancel = CancelToken::new();
                    cancel = state.cancel.clone();
                }
                _ => {
                    state.running = false;
                    break;
                }
            }
        }
    }

    /// Ask the active scan, if any, to stop at the next file boundary
    pub fn cancel_scan(&self) {
        let state = self.scan_slot.state.lock();
        if state.running {
            state.cancel.cancel();
        }
    }

    /// Ask the active cleanup sweep, if any, to stop at the next unit
    pub fn cancel_cleanup(&self) {
        let state = self.cleanup_slot.state.lock();
        if state.running {
            state.cancel.cancel();
        }
    }

    /// Whether a scan is currently active
    pub fn is_scan_running(&self) -> bool {
        self.scan_slot.state.lock().running
    }

    /// Whether a cleanup sweep is currently active
    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_slot.state.lock().running
    }

    /// Cancel whatever is running and wait for the workers to park
    pub fn shutdown(&self) {
        for handle in [
            {
                let mut state = self.scan_slot.state.lock();
                state.cancel.cancel();
                state.queued = None;
                state.handle.take()
            },
            {
                let mut state = self.cleanup_slot.state.lock();
                state.cancel.cancel();
                state.queued = None;
                state.handle.take()
            },
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
        debug!("engine workers stopped");
    }

    // ---- watcher boundary --------------------------------------------------

    /// Consume a batch of change events from the external watcher
    ///
    /// Removals are left for the cleaner; creations and modifications are
    /// deduplicated and fed to the scanner as an incremental run (or
    /// coalesced into the one already active).
    pub fn handle_watch_events(&self, events: Vec<WatchEvent>) -> Option<RunRequest> {
        let mut seen = HashSet::new();
        let paths: Vec<PathBuf> = events
            .into_iter()
            .filter(|e| e.kind != WatchEventKind::Removed)
            .map(|e| e.path)
            .filter(|p| seen.insert(p.clone()))
            .collect();

        if paths.is_empty() {
            return None;
        }
        debug!("watcher reported {} changed paths", paths.len());
        Some(self.request_incremental(paths))
    }

    // ---- user-facing operations --------------------------------------------

    /// Read a version's content for preview
    ///
    /// The blob is re-verified against the version's recorded hash; a
    /// mismatch surfaces instead of handing back corrupt bytes.
    pub fn read_version(&self, version_id: i64) -> Result<Vec<u8>> {
        let version = self.catalog.version(version_id)?;
        self.verified_blob(&version)
    }

    /// Copy a version's content to an arbitrary destination path
    pub fn export_version(&self, version_id: i64, dest: &Path) -> Result<()> {
        let version = self.catalog.version(version_id)?;
        let bytes = self.verified_blob(&version)?;
        std::fs::write(dest, bytes).map_err(|e| RetraceError::file_access(dest, e))?;
        info!("exported version {} to {:?}", version_id, dest);
        Ok(())
    }

    /// Restore a version over its original path
    ///
    /// The current on-disk content is preserved as a version first (the
    /// safety net: restoring never loses state), then the blob is written
    /// atomically over the original path and recorded as a new version
    /// noted "restored".
    pub fn restore_version(&self, version_id: i64) -> Result<PathBuf> {
        let version = self.catalog.version(version_id)?;
        let file = self.catalog.file(version.file_id)?;
        let bytes = self.verified_blob(&version)?;

        // Safety net: capture whatever is on disk right now before
        // overwriting it.
        if file.path.exists() {
            let current =
                std::fs::read(&file.path).map_err(|e| RetraceError::file_access(&file.path, e))?;
            let current_hash = hash_data(&current);
            if self.catalog.latest_hash(&file.path)?.as_deref() != Some(current_hash.as_str()) {
                let hash = self.store.put(&current)?;
                self.catalog.record_observation(
                    &file.path,
                    file.item_id,
                    &hash,
                    current.len() as u64,
                    file_mtime(&file.path),
                    None,
                )?;
                debug!("preserved pre-restore content of {:?}", file.path);
            }
        }

        atomic_write(&file.path, &bytes)?;

        if self.catalog.latest_hash(&file.path)?.as_deref() != Some(version.content_hash.as_str())
        {
            self.catalog.record_observation(
                &file.path,
                file.item_id,
                &version.content_hash,
                version.size,
                file_mtime(&file.path),
                Some("restored"),
            )?;
        }

        info!("restored version {} over {:?}", version_id, file.path);
        let _ = self.events.send(EngineEvent::VersionRestored {
            path: file.path.clone(),
        });
        Ok(file.path)
    }

    /// Delete one version (refused on hash mismatch)
    pub fn delete_version(&self, version_id: i64) -> Result<DeletedVersion> {
        let deleted = self.catalog.delete_version(version_id, &self.store)?;
        let _ = self.events.send(EngineEvent::VersionDeleted {
            path: deleted.file_path.clone(),
            file_removed: deleted.file_removed,
        });
        Ok(deleted)
    }

    /// Delete a batch of versions, reporting per-id failures
    pub fn delete_versions(&self, version_ids: &[i64]) -> BatchDeleteOutcome {
        let outcome = self.catalog.delete_versions_batch(version_ids, &self.store);
        if !outcome.files_removed.is_empty() {
            let _ = self.events.send(EngineEvent::FilesForgotten {
                paths: outcome.files_removed.clone(),
            });
        }
        outcome
    }

    /// Delete a file record together with its whole history
    pub fn delete_file(&self, file_id: i64) -> Result<(PathBuf, usize)> {
        let (path, versions) = self.catalog.delete_file_and_versions(file_id)?;
        let _ = self.events.send(EngineEvent::FilesForgotten {
            paths: vec![path.clone()],
        });
        Ok((path, versions))
    }

    fn verified_blob(&self, version: &Version) -> Result<Vec<u8>> {
        let bytes = self.store.read(&version.content_hash)?;
        let actual = hash_data(&bytes);
        if actual != version.content_hash {
            return Err(RetraceError::HashMismatch {
                expected: version.content_hash.clone(),
                actual,
            });
        }
        Ok(bytes)
    }
}
