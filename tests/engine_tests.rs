//! Integration tests for the version history engine
//!
//! These drive the scanner, cleaner, and engine against real temp
//! directories and assert the end-to-end guarantees: deduplication,
//! idempotent re-scans, cascade deletion, orphan reclamation, verified
//! destructive operations, and cooperative cancellation.

use retrace::catalog::Catalog;
use retrace::cleaner::RetentionCleaner;
use retrace::scanner::Scanner;
use retrace::store::ContentStore;
use retrace::{
    CancelToken, Engine, EngineConfig, EngineEvent, RetentionPolicy, RetraceError, RunOutcome,
    TrackedItem, WatchedItem,
};
use std::fs;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _data: TempDir,
    work: TempDir,
    catalog: Arc<Catalog>,
    store: Arc<ContentStore>,
    scanner: Scanner,
    cleaner: RetentionCleaner,
    events: Receiver<EngineEvent>,
}

impl Fixture {
    fn new() -> Self {
        let data = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let catalog = Arc::new(Catalog::open(data.path().join("metadata.db")).unwrap());
        let store = Arc::new(ContentStore::open(data.path().join("storage")).unwrap());
        let (tx, events) = channel();
        let scanner = Scanner::new(Arc::clone(&catalog), Arc::clone(&store), tx.clone());
        let cleaner = RetentionCleaner::new(Arc::clone(&catalog), Arc::clone(&store), tx);
        Fixture {
            _data: data,
            work,
            catalog,
            store,
            scanner,
            cleaner,
            events,
        }
    }

    fn track_folder(&self) -> Vec<TrackedItem> {
        self.catalog
            .sync_tracked_items(&[WatchedItem::folder(self.work.path(), vec![])])
            .unwrap()
    }

    fn write(&self, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = self.work.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Push a file's mtime forward so the size+mtime fast path cannot
    /// mistake rewritten content for the original on coarse filesystems.
    fn bump_mtime(path: &Path, seconds: i64) {
        let mtime = fs::metadata(path).unwrap().modified().unwrap();
        let bumped = filetime::FileTime::from_system_time(
            mtime + Duration::from_secs(seconds.unsigned_abs()),
        );
        filetime::set_file_mtime(path, bumped).unwrap();
    }

    fn change_events(&self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events.try_recv() {
            if matches!(
                event,
                EngineEvent::FileTracked { .. } | EngineEvent::VersionSaved { .. }
            ) {
                count += 1;
            }
        }
        count
    }
}

#[test]
fn scan_of_empty_tracked_set_is_nothing_to_scan() {
    let fx = Fixture::new();
    let cancel = CancelToken::new();

    let summary = fx.scanner.run_full(&[], &cancel, None);

    assert_eq!(summary.outcome, RunOutcome::NothingToDo);
    assert_eq!(summary.files_seen, 0);
    assert!(fx.catalog.list_files().unwrap().is_empty());
}

#[test]
fn version_hash_verifies_right_after_creation() {
    let fx = Fixture::new();
    fx.write("a.txt", b"round trip");
    let items = fx.track_folder();

    fx.scanner.run_full(&items, &CancelToken::new(), None);

    let file = fx.catalog.list_files().unwrap().remove(0);
    let version = fx.catalog.list_versions(file.id).unwrap().remove(0);
    fx.catalog
        .verify_version_blob(&version, &fx.store)
        .expect("fresh version must verify against its blob");
    assert_eq!(fx.store.read(&version.content_hash).unwrap(), b"round trip");
}

#[test]
fn unchanged_rescan_creates_no_versions_and_no_events() {
    let fx = Fixture::new();
    fx.write("a.txt", b"stable");
    fx.write("b.txt", b"also stable");
    let items = fx.track_folder();

    let first = fx.scanner.run_full(&items, &CancelToken::new(), None);
    assert_eq!(first.files_tracked, 2);
    assert_eq!(fx.change_events(), 2);

    let second = fx.scanner.run_full(&items, &CancelToken::new(), None);
    assert_eq!(second.outcome, RunOutcome::Finished);
    assert_eq!(second.files_tracked, 0);
    assert_eq!(second.versions_saved, 0);
    assert_eq!(fx.change_events(), 0);

    let file = fx.catalog.list_files().unwrap().remove(0);
    assert_eq!(fx.catalog.list_versions(file.id).unwrap().len(), 1);
}

#[test]
fn modified_content_gets_a_second_version_and_both_blobs_stay() {
    let fx = Fixture::new();
    let path = fx.write("a.txt", b"hello");
    let items = fx.track_folder();

    fx.scanner.run_full(&items, &CancelToken::new(), None);
    let file = fx.catalog.list_files().unwrap().remove(0);
    let h1 = fx.catalog.list_versions(file.id).unwrap()[0]
        .content_hash
        .clone();

    fs::write(&path, b"world").unwrap();
    Fixture::bump_mtime(&path, 2);
    fx.scanner.run_full(&items, &CancelToken::new(), None);

    let versions = fx.catalog.list_versions(file.id).unwrap();
    assert_eq!(versions.len(), 2);
    let h2 = versions[0].content_hash.clone();
    assert_ne!(h1, h2);
    assert!(fx.store.exists(&h1));
    assert!(fx.store.exists(&h2));
    assert_eq!(fx.catalog.list_files().unwrap().len(), 1);
}

#[test]
fn deleted_version_orphans_its_blob_until_the_next_sweep() {
    let fx = Fixture::new();
    let path = fx.write("a.txt", b"hello");
    let items = fx.track_folder();

    fx.scanner.run_full(&items, &CancelToken::new(), None);
    fs::write(&path, b"world").unwrap();
    Fixture::bump_mtime(&path, 2);
    fx.scanner.run_full(&items, &CancelToken::new(), None);

    let file = fx.catalog.list_files().unwrap().remove(0);
    let versions = fx.catalog.list_versions(file.id).unwrap();
    let (newest, oldest) = (&versions[0], &versions[1]);
    let (h2, h1) = (newest.content_hash.clone(), oldest.content_hash.clone());

    // Deleting the older version leaves the record with one version and
    // the blob orphaned on disk.
    let deleted = fx.catalog.delete_version(oldest.id, &fx.store).unwrap();
    assert!(!deleted.file_removed);
    assert_eq!(fx.catalog.list_versions(file.id).unwrap().len(), 1);
    assert!(fx.store.exists(&h1));

    // The sweep reclaims it.
    let summary = fx
        .cleaner
        .run(&items, &RetentionPolicy::default(), &CancelToken::new());
    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.blobs_reclaimed, 1);
    assert!(!fx.store.exists(&h1));
    assert!(fx.store.exists(&h2));
}

#[test]
fn deleting_the_only_version_cascades_to_the_file_record() {
    let fx = Fixture::new();
    fx.write("a.txt", b"short lived");
    let items = fx.track_folder();
    fx.scanner.run_full(&items, &CancelToken::new(), None);

    let file = fx.catalog.list_files().unwrap().remove(0);
    let version = fx.catalog.list_versions(file.id).unwrap().remove(0);

    let deleted = fx.catalog.delete_version(version.id, &fx.store).unwrap();
    assert!(deleted.file_removed);
    assert!(fx.catalog.list_files().unwrap().is_empty());

    let summary = fx
        .cleaner
        .run(&items, &RetentionPolicy::default(), &CancelToken::new());
    assert_eq!(summary.blobs_reclaimed, 1);
    assert!(fx.store.iter_hashes().unwrap().is_empty());
}

#[test]
fn corrupted_blob_blocks_deletion_without_mutation() {
    let fx = Fixture::new();
    fx.write("a.txt", b"pristine content");
    let items = fx.track_folder();
    fx.scanner.run_full(&items, &CancelToken::new(), None);

    let file = fx.catalog.list_files().unwrap().remove(0);
    let version = fx.catalog.list_versions(file.id).unwrap().remove(0);
    fs::write(fx.store.object_path(&version.content_hash), b"tampered bytes!!").unwrap();

    let err = fx.catalog.delete_version(version.id, &fx.store).unwrap_err();
    assert!(matches!(err, RetraceError::HashMismatch { .. }));
    assert_eq!(fx.catalog.list_versions(file.id).unwrap().len(), 1);
    assert_eq!(fx.catalog.list_files().unwrap().len(), 1);
}

#[test]
fn cancellation_between_files_stops_after_exactly_three() {
    let fx = Fixture::new();
    for i in 0..10 {
        fx.write(&format!("file{}.txt", i), format!("content {}", i).as_bytes());
    }
    let items = fx.track_folder();

    let cancel = CancelToken::new();
    let cancel_after_three = {
        let cancel = cancel.clone();
        move |progress: &retrace::scanner::ScanProgress| {
            if progress.processed == 3 {
                cancel.cancel();
            }
        }
    };
    let progress: &retrace::scanner::ProgressFn = &cancel_after_three;
    let summary = fx.scanner.run_full(&items, &cancel, Some(progress));

    assert_eq!(summary.outcome, RunOutcome::Interrupted);
    assert_eq!(summary.files_seen, 3);
    let total_versions: usize = fx
        .catalog
        .list_files()
        .unwrap()
        .iter()
        .map(|f| fx.catalog.list_versions(f.id).unwrap().len())
        .sum();
    assert_eq!(total_versions, 3);

    // Re-running resumes idempotently: the three already-captured files
    // compare equal and only the remaining seven gain versions.
    let resumed = fx.scanner.run_full(&items, &CancelToken::new(), None);
    assert_eq!(resumed.outcome, RunOutcome::Finished);
    assert_eq!(resumed.files_tracked, 7);
    assert_eq!(resumed.versions_saved, 0);

    let files = fx.catalog.list_files().unwrap();
    assert_eq!(files.len(), 10);
    for file in files {
        assert_eq!(fx.catalog.list_versions(file.id).unwrap().len(), 1);
    }
}

#[test]
fn incremental_scan_only_touches_reported_paths() {
    let fx = Fixture::new();
    let changed = fx.write("changed.txt", b"before");
    fx.write("untouched.txt", b"same forever");
    let items = fx.track_folder();
    fx.scanner.run_full(&items, &CancelToken::new(), None);

    fs::write(&changed, b"after!").unwrap();
    Fixture::bump_mtime(&changed, 2);

    let summary = fx.scanner.run_incremental(
        &items,
        &[changed.clone()],
        &CancelToken::new(),
        None,
    );
    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.versions_saved, 1);

    // Paths outside the tracked scope are ignored entirely.
    let outside = fx.scanner.run_incremental(
        &items,
        &[std::path::PathBuf::from("/definitely/not/tracked.txt")],
        &CancelToken::new(),
        None,
    );
    assert_eq!(outside.outcome, RunOutcome::NothingToDo);
}

#[test]
fn exclusions_keep_folder_contents_out_of_history() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.work.path().join("build")).unwrap();
    fx.write("keep.txt", b"keep me");
    fx.write("build/artifact.bin", b"generated");
    fx.write("scratch.tmp", b"scratch");

    let items = fx
        .catalog
        .sync_tracked_items(&[WatchedItem::folder(
            fx.work.path(),
            vec!["build".to_string(), "*.tmp".to_string()],
        )])
        .unwrap();
    fx.scanner.run_full(&items, &CancelToken::new(), None);

    let files = fx.catalog.list_files().unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].path.ends_with("keep.txt"));
}

#[test]
fn cleanup_removes_unreachable_records_and_reports_noop_when_idle() {
    let fx = Fixture::new();
    let gone = fx.write("gone.txt", b"will vanish");
    fx.write("stays.txt", b"still here");
    let items = fx.track_folder();
    fx.scanner.run_full(&items, &CancelToken::new(), None);

    fs::remove_file(&gone).unwrap();
    let summary = fx
        .cleaner
        .run(&items, &RetentionPolicy::default(), &CancelToken::new());
    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.files_removed, 1);
    assert_eq!(summary.versions_removed, 1);
    assert_eq!(summary.blobs_reclaimed, 1);
    assert_eq!(fx.catalog.list_files().unwrap().len(), 1);

    // A second sweep has nothing left to do.
    let idle = fx
        .cleaner
        .run(&items, &RetentionPolicy::default(), &CancelToken::new());
    assert_eq!(idle.outcome, RunOutcome::NothingToDo);
    assert!(idle.is_noop());
}

#[test]
fn cleanup_prunes_unrecoverable_versions_separately() {
    let fx = Fixture::new();
    let path = fx.write("a.txt", b"original");
    let items = fx.track_folder();
    fx.scanner.run_full(&items, &CancelToken::new(), None);
    fs::write(&path, b"replacement").unwrap();
    Fixture::bump_mtime(&path, 2);
    fx.scanner.run_full(&items, &CancelToken::new(), None);

    let file = fx.catalog.list_files().unwrap().remove(0);
    let oldest = fx.catalog.list_versions(file.id).unwrap().remove(1);
    fx.store.delete(&oldest.content_hash).unwrap();

    let summary = fx
        .cleaner
        .run(&items, &RetentionPolicy::default(), &CancelToken::new());
    assert_eq!(summary.unrecoverable_pruned, 1);
    assert_eq!(fx.catalog.list_versions(file.id).unwrap().len(), 1);
}

#[test]
fn retention_policy_prunes_old_versions_but_keeps_newest() {
    let fx = Fixture::new();
    let path = fx.write("a.txt", b"v1");
    let items = fx.track_folder();
    fx.scanner.run_full(&items, &CancelToken::new(), None);
    for (i, content) in [b"v2".as_slice(), b"v3", b"v4"].iter().enumerate() {
        fs::write(&path, content).unwrap();
        Fixture::bump_mtime(&path, 2 * (i as i64 + 1));
        fx.scanner.run_full(&items, &CancelToken::new(), None);
    }

    let policy = RetentionPolicy {
        max_versions_per_file: Some(2),
        max_age_days: None,
    };
    let summary = fx.cleaner.run(&items, &policy, &CancelToken::new());
    assert_eq!(summary.stale_versions_pruned, 2);
    // The pruned versions' blobs became orphans and were reclaimed in the
    // same sweep.
    assert_eq!(summary.blobs_reclaimed, 2);

    let file = fx.catalog.list_files().unwrap().remove(0);
    let versions = fx.catalog.list_versions(file.id).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(
        fx.store.read(&versions[0].content_hash).unwrap(),
        b"v4".to_vec()
    );
}

#[test]
fn cleanup_can_be_interrupted_between_units() {
    let fx = Fixture::new();
    for i in 0..5 {
        fx.write(&format!("f{}.txt", i), format!("gone {}", i).as_bytes());
    }
    let items = fx.track_folder();
    fx.scanner.run_full(&items, &CancelToken::new(), None);
    for i in 0..5 {
        fs::remove_file(fx.work.path().join(format!("f{}.txt", i))).unwrap();
    }

    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = fx.cleaner.run(&items, &RetentionPolicy::default(), &cancel);
    assert_eq!(summary.outcome, RunOutcome::Interrupted);
    // Nothing was removed: cancellation was observed before the first unit.
    assert_eq!(fx.catalog.list_files().unwrap().len(), 5);
}

// ---- engine-level tests ----------------------------------------------------

fn wait_for_scan(events: &Receiver<EngineEvent>) -> retrace::ScanSummary {
    loop {
        match events
            .recv_timeout(Duration::from_secs(30))
            .expect("scan must report a terminal summary")
        {
            EngineEvent::ScanFinished(summary) => return summary,
            _ => continue,
        }
    }
}

#[test]
fn engine_runs_scans_on_a_worker_and_reports_once() {
    let data = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    fs::write(work.path().join("doc.txt"), b"engine test").unwrap();

    let mut config = EngineConfig::default();
    config
        .watched_items
        .push(WatchedItem::folder(work.path(), vec![]));
    let (engine, events) = Engine::open(data.path(), config).unwrap();

    engine.request_scan();
    let summary = wait_for_scan(&events);
    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.files_tracked, 1);

    engine.shutdown();
    assert!(!engine.is_scan_running());
}

#[test]
fn engine_scan_with_no_items_reports_nothing_to_do() {
    let data = TempDir::new().unwrap();
    let (engine, events) = Engine::open(data.path(), EngineConfig::default()).unwrap();

    engine.request_scan();
    let summary = wait_for_scan(&events);
    assert_eq!(summary.outcome, RunOutcome::NothingToDo);
    engine.shutdown();
}

#[test]
fn engine_restore_preserves_current_content_first() {
    let data = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let path = work.path().join("doc.txt");
    fs::write(&path, b"alpha").unwrap();

    let mut config = EngineConfig::default();
    config
        .watched_items
        .push(WatchedItem::folder(work.path(), vec![]));
    let (engine, events) = Engine::open(data.path(), config).unwrap();

    engine.request_scan();
    wait_for_scan(&events);

    fs::write(&path, b"beta, much longer").unwrap();
    Fixture::bump_mtime(&path, 2);
    engine.request_scan();
    wait_for_scan(&events);

    let file = engine.catalog().find_file(&path).unwrap().unwrap();
    let versions = engine.catalog().list_versions(file.id).unwrap();
    assert_eq!(versions.len(), 2);
    let alpha = versions.last().unwrap().clone();

    let restored_to = engine.restore_version(alpha.id).unwrap();
    assert_eq!(restored_to, path);
    assert_eq!(fs::read(&path).unwrap(), b"alpha");

    // History now ends with a version noted "restored" carrying alpha's
    // hash; beta was already preserved, so nothing was lost.
    let versions = engine.catalog().list_versions(file.id).unwrap();
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[0].note.as_deref(), Some("restored"));
    assert_eq!(versions[0].content_hash, alpha.content_hash);
    engine.shutdown();
}

#[test]
fn engine_watch_events_trigger_incremental_scans() {
    let data = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let path = work.path().join("doc.txt");
    fs::write(&path, b"watched").unwrap();

    let mut config = EngineConfig::default();
    config
        .watched_items
        .push(WatchedItem::folder(work.path(), vec![]));
    let (engine, events) = Engine::open(data.path(), config).unwrap();

    let request = engine.handle_watch_events(vec![retrace::WatchEvent {
        path: path.clone(),
        kind: retrace::WatchEventKind::Modified,
    }]);
    assert!(request.is_some());

    let summary = wait_for_scan(&events);
    assert_eq!(summary.files_tracked, 1);

    // Removal-only batches are the cleaner's business, not the scanner's.
    let request = engine.handle_watch_events(vec![retrace::WatchEvent {
        path,
        kind: retrace::WatchEventKind::Removed,
    }]);
    assert!(request.is_none());
    engine.shutdown();
}

#[test]
fn engine_export_writes_verified_bytes() {
    let data = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    fs::write(work.path().join("doc.txt"), b"export me").unwrap();

    let mut config = EngineConfig::default();
    config
        .watched_items
        .push(WatchedItem::folder(work.path(), vec![]));
    let (engine, events) = Engine::open(data.path(), config).unwrap();
    engine.request_scan();
    wait_for_scan(&events);

    let file = engine.catalog().list_files().unwrap().remove(0);
    let version = engine.catalog().list_versions(file.id).unwrap().remove(0);

    let dest = work.path().join("doc (restored).txt");
    engine.export_version(version.id, &dest).unwrap();
    assert_eq!(fs::read(&dest).unwrap(), b"export me");

    assert_eq!(engine.read_version(version.id).unwrap(), b"export me");
    engine.shutdown();
}
