//! Durable metadata catalog for tracked items, files, and versions
//!
//! The catalog is the engine's sole source of truth: which items the user
//! watches, which concrete files have been discovered under them, and which
//! immutable versions exist for each file. It is a single local SQLite
//! database owned exclusively by this process.
//!
//! ## Schema
//!
//! ```text
//! tracked_items   one row per user-configured watched file or folder
//! tracked_files   one row per concrete on-disk file (unique by path)
//! versions        one row per immutable content snapshot
//! ```
//!
//! ## Transaction discipline
//!
//! Each scan-result write (file discovered, hash compared, version
//! inserted) is one transaction, so a crash mid-scan never leaves a file
//! record pointing at a hash with no blob, nor a version without a
//! consistent file record. Hashing and blob writes always happen *outside*
//! the transaction; only the small row mutations are transactional, which
//! bounds lock hold time.
//!
//! ## Failure semantics
//!
//! Open/initialization failure is fatal to the engine and surfaces as
//! [`RetraceError::CatalogUnavailable`]. Ordinary query errors during a
//! single file's processing are caught by the workers, logged, and the run
//! continues with the next file.
//!
//! Reference counts for content-store blobs are never stored: orphan
//! detection is always the set difference between blobs on disk and hashes
//! referenced by version rows, recomputed per sweep.

use crate::config::RetentionPolicy;
use crate::error::{Result, RetraceError};
use crate::store::ContentStore;
use crate::types::{FileRecord, ItemKind, TrackedItem, Version, WatchedItem};
use crate::utils::hash_data;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracked_items (
    id          INTEGER PRIMARY KEY,
    path        TEXT NOT NULL UNIQUE,
    kind        TEXT NOT NULL CHECK (kind IN ('file', 'folder')),
    exclusions  TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS tracked_files (
    id          INTEGER PRIMARY KEY,
    path        TEXT NOT NULL UNIQUE,
    item_id     INTEGER REFERENCES tracked_items(id) ON DELETE SET NULL,
    last_hash   TEXT,
    last_size   INTEGER,
    last_mtime  TEXT
);

CREATE TABLE IF NOT EXISTS versions (
    id           INTEGER PRIMARY KEY,
    file_id      INTEGER NOT NULL REFERENCES tracked_files(id) ON DELETE CASCADE,
    created_at   TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size         INTEGER NOT NULL,
    note         TEXT
);

CREATE INDEX IF NOT EXISTS idx_versions_file ON versions(file_id, created_at);
CREATE INDEX IF NOT EXISTS idx_versions_hash ON versions(content_hash);
";

/// Result of recording one scan observation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedVersion {
    /// File record the version belongs to
    pub file_id: i64,
    /// Newly inserted version row
    pub version_id: i64,
    /// Whether the file record was created by this observation
    pub newly_tracked: bool,
}

/// Result of deleting a single version
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedVersion {
    /// Hash the deleted version referenced (blob reclaim is the sweep's job)
    pub content_hash: String,
    /// Path of the owning file record
    pub file_path: PathBuf,
    /// Whether the file record went away with its last version
    pub file_removed: bool,
}

/// Result of a batch deletion
#[derive(Debug, Clone, Default)]
pub struct BatchDeleteOutcome {
    /// Versions actually deleted
    pub deleted: usize,
    /// Paths of file records removed along the way
    pub files_removed: Vec<PathBuf>,
    /// Per-id failures, reported without aborting the batch
    pub failures: Vec<(i64, String)>,
}

/// The durable relational record of tracked items, files, and versions
///
/// Opened once per engine lifetime. A mutex serializes access to the
/// connection; individual operations are short transactions that never
/// span file I/O.
pub struct Catalog {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("path", &self.path).finish()
    }
}

impl Catalog {
    /// Open (or create) the catalog database at `path`
    ///
    /// # Errors
    ///
    /// Returns [`RetraceError::CatalogUnavailable`] if the database cannot
    /// be opened or its schema cannot be initialized. This is fatal to the
    /// engine.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let conn = Connection::open(&path).map_err(|e| RetraceError::CatalogUnavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Self::configure(conn, path)
    }

    /// Open an in-memory catalog (tests and throwaway runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| RetraceError::CatalogUnavailable {
                path: PathBuf::from(":memory:"),
                reason: e.to_string(),
            })?;
        Self::configure(conn, PathBuf::from(":memory:"))
    }

    fn configure(conn: Connection, path: PathBuf) -> Result<Self> {
        let init = || -> rusqlite::Result<()> {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(10))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        };
        init().map_err(|e| RetraceError::CatalogUnavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        info!("catalog ready at {:?}", path);
        Ok(Catalog {
            conn: Mutex::new(conn),
            path,
        })
    }

    // ---- tracked items ----------------------------------------------------

    /// Reconcile the catalog's tracked items with the configured set
    ///
    /// Upserts every configured item and removes registrations no longer
    /// present in the configuration. File records under removed items are
    /// left for the cleaner to sweep.
    pub fn sync_tracked_items(&self, items: &[WatchedItem]) -> Result<Vec<TrackedItem>> {
        let mut guard = self.conn.lock();
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let keep: HashSet<String> = items
            .iter()
            .map(|i| i.path.to_string_lossy().into_owned())
            .collect();

        {
            let mut stmt = tx.prepare("SELECT id, path FROM tracked_items")?;
            let stale: Vec<i64> = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .filter_map(|r| r.ok())
                .filter(|(_, path)| !keep.contains(path))
                .map(|(id, _)| id)
                .collect();
            for id in stale {
                tx.execute("DELETE FROM tracked_items WHERE id = ?1", params![id])?;
            }
        }

        for item in items {
            let exclusions = serde_json::to_string(&item.exclusions)?;
            tx.execute(
                "INSERT INTO tracked_items (path, kind, exclusions) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET kind = excluded.kind,
                                                 exclusions = excluded.exclusions",
                params![
                    item.path.to_string_lossy(),
                    item.kind.as_str(),
                    exclusions
                ],
            )?;
        }

        tx.commit()?;
        drop(guard);
        self.tracked_items()
    }

    /// All registered tracked items
    pub fn tracked_items(&self) -> Result<Vec<TrackedItem>> {
        let guard = self.conn.lock();
        let mut stmt =
            guard.prepare("SELECT id, path, kind, exclusions FROM tracked_items ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, path, kind, exclusions) = row?;
            let kind = ItemKind::parse(&kind)
                .ok_or_else(|| RetraceError::internal(format!("bad item kind: {}", kind)))?;
            let exclusions: Vec<String> = serde_json::from_str(&exclusions).unwrap_or_else(|e| {
                warn!("discarding unreadable exclusions for item {}: {}", id, e);
                Vec::new()
            });
            items.push(TrackedItem {
                id,
                path: PathBuf::from(path),
                kind,
                exclusions,
            });
        }
        Ok(items)
    }

    // ---- file records and versions ----------------------------------------

    /// Record one scan observation as a single transaction
    ///
    /// Upserts the file record for `path`, inserts the version row, and
    /// updates the record's last-known hash/size/mtime together. The blob
    /// for `hash` must already be durably written to the content store
    /// before this is called.
    pub fn record_observation(
        &self,
        path: &Path,
        item_id: Option<i64>,
        hash: &str,
        size: u64,
        mtime: Option<DateTime<Utc>>,
        note: Option<&str>,
    ) -> Result<RecordedVersion> {
        let mut guard = self.conn.lock();
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let path_str = path.to_string_lossy();

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM tracked_files WHERE path = ?1",
                params![path_str],
                |row| row.get(0),
            )
            .optional()?;

        let (file_id, newly_tracked) = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE tracked_files
                     SET item_id = ?1, last_hash = ?2, last_size = ?3, last_mtime = ?4
                     WHERE id = ?5",
                    params![item_id, hash, size as i64, mtime, id],
                )?;
                (id, false)
            }
            None => {
                tx.execute(
                    "INSERT INTO tracked_files (path, item_id, last_hash, last_size, last_mtime)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![path_str, item_id, hash, size as i64, mtime],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };

        tx.execute(
            "INSERT INTO versions (file_id, created_at, content_hash, size, note)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![file_id, Utc::now(), hash, size as i64, note],
        )?;
        let version_id = tx.last_insert_rowid();

        tx.commit()?;
        debug!(
            "recorded version {} for {:?} (hash {})",
            version_id,
            path,
            &hash[..8.min(hash.len())]
        );
        Ok(RecordedVersion {
            file_id,
            version_id,
            newly_tracked,
        })
    }

    /// Refresh a file record's last-seen size and mtime without a new version
    ///
    /// Used when a rescan finds identical content behind a changed mtime,
    /// so later scans can keep taking the cheap compare path.
    pub fn touch_file(
        &self,
        file_id: i64,
        size: u64,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let guard = self.conn.lock();
        guard.execute(
            "UPDATE tracked_files SET last_size = ?1, last_mtime = ?2 WHERE id = ?3",
            params![size as i64, mtime, file_id],
        )?;
        Ok(())
    }

    /// Last-known content hash for a path, if the path is tracked
    pub fn latest_hash(&self, path: &Path) -> Result<Option<String>> {
        let guard = self.conn.lock();
        Ok(guard
            .query_row(
                "SELECT last_hash FROM tracked_files WHERE path = ?1",
                params![path.to_string_lossy()],
                |row| row.get(0),
            )
            .optional()?
            .flatten())
    }

    /// Look up a file record by absolute path
    pub fn find_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        let guard = self.conn.lock();
        guard
            .query_row(
                "SELECT id, path, item_id, last_hash, last_size, last_mtime
                 FROM tracked_files WHERE path = ?1",
                params![path.to_string_lossy()],
                Self::file_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Fetch a file record by id
    pub fn file(&self, file_id: i64) -> Result<FileRecord> {
        let guard = self.conn.lock();
        guard
            .query_row(
                "SELECT id, path, item_id, last_hash, last_size, last_mtime
                 FROM tracked_files WHERE id = ?1",
                params![file_id],
                Self::file_from_row,
            )
            .optional()?
            .ok_or(RetraceError::FileNotFound(file_id))
    }

    /// All file records, ordered by path
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let guard = self.conn.lock();
        let mut stmt = guard.prepare(
            "SELECT id, path, item_id, last_hash, last_size, last_mtime
             FROM tracked_files ORDER BY path",
        )?;
        let rows = stmt.query_map([], Self::file_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
        Ok(FileRecord {
            id: row.get(0)?,
            path: PathBuf::from(row.get::<_, String>(1)?),
            item_id: row.get(2)?,
            last_hash: row.get(3)?,
            last_size: row.get::<_, Option<i64>>(4)?.map(|s| s as u64),
            last_mtime: row.get(5)?,
        })
    }

    /// Versions of one file, newest first
    pub fn list_versions(&self, file_id: i64) -> Result<Vec<Version>> {
        let guard = self.conn.lock();
        let mut stmt = guard.prepare(
            "SELECT id, file_id, created_at, content_hash, size, note
             FROM versions WHERE file_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![file_id], Self::version_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Every version in the catalog (cleanup verification pass)
    pub fn list_all_versions(&self) -> Result<Vec<Version>> {
        let guard = self.conn.lock();
        let mut stmt = guard.prepare(
            "SELECT id, file_id, created_at, content_hash, size, note
             FROM versions ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::version_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Fetch a version by id
    pub fn version(&self, version_id: i64) -> Result<Version> {
        let guard = self.conn.lock();
        guard
            .query_row(
                "SELECT id, file_id, created_at, content_hash, size, note
                 FROM versions WHERE id = ?1",
                params![version_id],
                Self::version_from_row,
            )
            .optional()?
            .ok_or(RetraceError::VersionNotFound(version_id))
    }

    fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Version> {
        Ok(Version {
            id: row.get(0)?,
            file_id: row.get(1)?,
            created_at: row.get(2)?,
            content_hash: row.get(3)?,
            size: row.get::<_, i64>(4)? as u64,
            note: row.get(5)?,
        })
    }

    // ---- deletion ----------------------------------------------------------

    /// Verify that a version's stored blob matches its recorded hash
    ///
    /// The cheap size gate runs first; on any doubt the blob bytes are
    /// re-hashed in full. Performed before every destructive operation.
    ///
    /// # Errors
    ///
    /// Returns [`RetraceError::HashMismatch`] when the blob is missing,
    /// has the wrong size, or re-hashes to a different digest.
    pub fn verify_version_blob(&self, version: &Version, store: &ContentStore) -> Result<()> {
        if !store.verify(&version.content_hash, version.size) {
            let actual = match store.read(&version.content_hash) {
                Ok(bytes) => hash_data(&bytes),
                Err(_) => "missing".to_string(),
            };
            return Err(RetraceError::HashMismatch {
                expected: version.content_hash.clone(),
                actual,
            });
        }
        let bytes = store.read(&version.content_hash)?;
        let actual = hash_data(&bytes);
        if actual != version.content_hash {
            return Err(RetraceError::HashMismatch {
                expected: version.content_hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Delete one version after verifying its stored blob
    ///
    /// Refuses with [`RetraceError::HashMismatch`] when the blob fails
    /// verification, making no mutation: a record that disagrees with its
    /// bytes is a problem to surface, not to silently discard. A file
    /// record left with zero versions is deleted in the same transaction,
    /// along with a directly-watched file item for that path. The orphaned
    /// blob, if any, is left for the next cleanup sweep.
    ///
    /// # Errors
    ///
    /// - [`RetraceError::VersionNotFound`] if the id is absent
    /// - [`RetraceError::HashMismatch`] if blob verification fails
    pub fn delete_version(&self, version_id: i64, store: &ContentStore) -> Result<DeletedVersion> {
        let version = self.version(version_id)?;
        let file = self.file(version.file_id)?;

        self.verify_version_blob(&version, store)?;

        let mut guard = self.conn.lock();
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM versions WHERE id = ?1", params![version_id])?;

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM versions WHERE file_id = ?1",
            params![version.file_id],
            |row| row.get(0),
        )?;

        let file_removed = remaining == 0;
        if file_removed {
            tx.execute(
                "DELETE FROM tracked_files WHERE id = ?1",
                params![version.file_id],
            )?;
            tx.execute(
                "DELETE FROM tracked_items WHERE path = ?1 AND kind = 'file'",
                params![file.path.to_string_lossy()],
            )?;
        }

        tx.commit()?;
        debug!(
            "deleted version {} of {:?} (file removed: {})",
            version_id, file.path, file_removed
        );
        Ok(DeletedVersion {
            content_hash: version.content_hash,
            file_path: file.path,
            file_removed,
        })
    }

    /// Delete a batch of versions, one verified deletion at a time
    ///
    /// Per-id failures are collected and reported; they never abort the
    /// rest of the batch.
    pub fn delete_versions_batch(
        &self,
        version_ids: &[i64],
        store: &ContentStore,
    ) -> BatchDeleteOutcome {
        let mut outcome = BatchDeleteOutcome::default();
        for &id in version_ids {
            match self.delete_version(id, store) {
                Ok(deleted) => {
                    outcome.deleted += 1;
                    if deleted.file_removed {
                        outcome.files_removed.push(deleted.file_path);
                    }
                }
                Err(e) => {
                    warn!("batch deletion of version {} failed: {}", id, e);
                    outcome.failures.push((id, e.to_string()));
                }
            }
        }
        outcome
    }

    /// Delete a file record together with all of its versions
    ///
    /// Returns the record's path and the number of versions removed.
    pub fn delete_file_and_versions(&self, file_id: i64) -> Result<(PathBuf, usize)> {
        let mut guard = self.conn.lock();
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let path: Option<String> = tx
            .query_row(
                "SELECT path FROM tracked_files WHERE id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        let path = path.ok_or(RetraceError::FileNotFound(file_id))?;

        let removed = tx.execute("DELETE FROM versions WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM tracked_files WHERE id = ?1", params![file_id])?;
        tx.execute(
            "DELETE FROM tracked_items WHERE path = ?1 AND kind = 'file'",
            params![path],
        )?;
        tx.commit()?;

        debug!("deleted file record {:?} with {} versions", path, removed);
        Ok((PathBuf::from(path), removed))
    }

    /// Remove a version row without blob verification
    ///
    /// Used by the cleaner for versions whose backing blob is already known
    /// unrecoverable; verified deletion would always refuse them.
    pub fn remove_version_record(&self, version_id: i64) -> Result<()> {
        let guard = self.conn.lock();
        guard.execute("DELETE FROM versions WHERE id = ?1", params![version_id])?;
        Ok(())
    }

    // ---- derived queries for cleanup ---------------------------------------

    /// Hashes present in the content store with zero referencing versions
    ///
    /// Always a recomputed set difference, never a stored counter.
    pub fn find_orphan_blob_hashes(&self, store: &ContentStore) -> Result<Vec<String>> {
        let referenced: HashSet<String> = {
            let guard = self.conn.lock();
            let mut stmt = guard.prepare("SELECT DISTINCT content_hash FROM versions")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<HashSet<_>>>()?
        };

        let mut orphans: Vec<String> = store
            .iter_hashes()?
            .into_iter()
            .filter(|h| !referenced.contains(h))
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    /// Prune versions according to the injected retention policy
    ///
    /// Two independent dimensions: a per-file cap on version count (keep
    /// the newest N) and a maximum age. A file's newest version is never
    /// pruned, whatever its age. Returns the number of versions removed.
    pub fn delete_stale_versions(&self, policy: &RetentionPolicy) -> Result<usize> {
        let mut pruned = 0usize;
        let guard = self.conn.lock();

        if let Some(max_versions) = policy.max_versions_per_file {
            pruned += guard.execute(
                "DELETE FROM versions WHERE id IN (
                     SELECT id FROM (
                         SELECT id,
                                ROW_NUMBER() OVER (
                                    PARTITION BY file_id
                                    ORDER BY created_at DESC, id DESC
                                ) AS rn
                         FROM versions
                     ) WHERE rn > ?1
                 )",
                params![max_versions as i64],
            )?;
        }

        if let Some(max_age_days) = policy.max_age_days {
            let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);
            pruned += guard.execute(
                "DELETE FROM versions WHERE created_at < ?1 AND id NOT IN (
                     SELECT id FROM versions v2
                     WHERE v2.file_id = versions.file_id
                     ORDER BY v2.created_at DESC, v2.id DESC LIMIT 1
                 )",
                params![cutoff],
            )?;
        }

        if pruned > 0 {
            debug!("retention policy pruned {} versions", pruned);
        }
        Ok(pruned)
    }

    /// Delete file records whose version count dropped to zero
    ///
    /// Cascading cleanliness: no dangling tracked-file entries with no
    /// history. Directly-watched file items for those paths go away too.
    /// Returns the paths of the removed records.
    pub fn prune_empty_files(&self) -> Result<Vec<PathBuf>> {
        let mut guard = self.conn.lock();
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let empty: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, path FROM tracked_files
                 WHERE id NOT IN (SELECT DISTINCT file_id FROM versions)",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for (id, path) in &empty {
            tx.execute("DELETE FROM tracked_files WHERE id = ?1", params![id])?;
            tx.execute(
                "DELETE FROM tracked_items WHERE path = ?1 AND kind = 'file'",
                params![path],
            )?;
        }
        tx.commit()?;

        Ok(empty.into_iter().map(|(_, p)| PathBuf::from(p)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionPolicy;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Catalog, ContentStore) {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let store = ContentStore::open(dir.path().join("store")).unwrap();
        (dir, catalog, store)
    }

    fn observe(catalog: &Catalog, store: &ContentStore, path: &str, content: &[u8]) -> RecordedVersion {
        let hash = store.put(content).unwrap();
        catalog
            .record_observation(Path::new(path), None, &hash, content.len() as u64, None, None)
            .unwrap()
    }

    #[test]
    fn test_record_first_observation_creates_file() {
        let (_dir, catalog, store) = fixture();
        let recorded = observe(&catalog, &store, "/data/doc.txt", b"version 1");

        assert!(recorded.newly_tracked);
        let versions = catalog.list_versions(recorded.file_id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].size, 9);
        assert_eq!(
            catalog.latest_hash(Path::new("/data/doc.txt")).unwrap(),
            Some(versions[0].content_hash.clone())
        );
    }

    #[test]
    fn test_second_observation_reuses_file_record() {
        let (_dir, catalog, store) = fixture();
        let first = observe(&catalog, &store, "/data/doc.txt", b"version 1");
        let second = observe(&catalog, &store, "/data/doc.txt", b"version 2 - changed");

        assert!(!second.newly_tracked);
        assert_eq!(first.file_id, second.file_id);
        assert_eq!(catalog.list_versions(first.file_id).unwrap().len(), 2);
        assert_eq!(catalog.list_files().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_version_keeps_file_when_more_remain() {
        let (_dir, catalog, store) = fixture();
        let first = observe(&catalog, &store, "/data/doc.txt", b"one");
        observe(&catalog, &store, "/data/doc.txt", b"two");

        let versions = catalog.list_versions(first.file_id).unwrap();
        let newest = &versions[0];
        let deleted = catalog.delete_version(newest.id, &store).unwrap();

        assert!(!deleted.file_removed);
        let remaining = catalog.list_versions(first.file_id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].id, newest.id);
    }

    #[test]
    fn test_delete_last_version_removes_file_record() {
        let (_dir, catalog, store) = fixture();
        let recorded = observe(&catalog, &store, "/data/doc.txt", b"only");
        let version = &catalog.list_versions(recorded.file_id).unwrap()[0];

        let deleted = catalog.delete_version(version.id, &store).unwrap();
        assert!(deleted.file_removed);
        assert!(catalog.list_files().unwrap().is_empty());
        assert!(matches!(
            catalog.file(recorded.file_id),
            Err(RetraceError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_delete_version_refuses_on_hash_mismatch() {
        let (_dir, catalog, store) = fixture();
        let recorded = observe(&catalog, &store, "/data/doc.txt", b"pristine");
        let version = catalog.list_versions(recorded.file_id).unwrap()[0].clone();

        // Corrupt the blob behind the catalog's back.
        std::fs::write(store.object_path(&version.content_hash), b"tampered!").unwrap();

        let err = catalog.delete_version(version.id, &store).unwrap_err();
        assert!(matches!(err, RetraceError::HashMismatch { .. }));

        // No mutation happened.
        assert_eq!(catalog.list_versions(recorded.file_id).unwrap().len(), 1);
        assert_eq!(catalog.list_files().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_missing_version() {
        let (_dir, catalog, store) = fixture();
        let err = catalog.delete_version(999, &store).unwrap_err();
        assert!(matches!(err, RetraceError::VersionNotFound(999)));
    }

    #[test]
    fn test_batch_delete_reports_failures_without_aborting() {
        let (_dir, catalog, store) = fixture();
        let a = observe(&catalog, &store, "/data/a.txt", b"aaa");
        let b = observe(&catalog, &store, "/data/b.txt", b"bbb");

        let outcome =
            catalog.delete_versions_batch(&[a.version_id, 777, b.version_id], &store);
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, 777);
        assert_eq!(outcome.files_removed.len(), 2);
    }

    #[test]
    fn test_orphan_hashes_are_set_difference() {
        let (_dir, catalog, store) = fixture();
        let tracked = observe(&catalog, &store, "/data/doc.txt", b"kept");
        let orphan_hash = store.put(b"nothing references me").unwrap();

        let orphans = catalog.find_orphan_blob_hashes(&store).unwrap();
        assert_eq!(orphans, vec![orphan_hash]);

        // The referenced blob is not an orphan.
        let kept_hash = catalog.list_versions(tracked.file_id).unwrap()[0]
            .content_hash
            .clone();
        assert!(!orphans.contains(&kept_hash));
    }

    #[test]
    fn test_retention_cap_keeps_newest() {
        let (_dir, catalog, store) = fixture();
        let recorded = observe(&catalog, &store, "/data/doc.txt", b"v1");
        observe(&catalog, &store, "/data/doc.txt", b"v22");
        observe(&catalog, &store, "/data/doc.txt", b"v333");

        let policy = RetentionPolicy {
            max_versions_per_file: Some(2),
            max_age_days: None,
        };
        let pruned = catalog.delete_stale_versions(&policy).unwrap();
        assert_eq!(pruned, 1);

        let versions = catalog.list_versions(recorded.file_id).unwrap();
        assert_eq!(versions.len(), 2);
        // Newest first; sizes identify which survived.
        assert_eq!(versions[0].size, 4);
        assert_eq!(versions[1].size, 3);
    }

    #[test]
    fn test_sync_tracked_items_upserts_and_removes() {
        let (_dir, catalog, _store) = fixture();
        let items = vec![
            WatchedItem::file("/data/doc.txt"),
            WatchedItem::folder("/data/project", vec!["target".to_string()]),
        ];
        let registered = catalog.sync_tracked_items(&items).unwrap();
        assert_eq!(registered.len(), 2);

        let registered = catalog
            .sync_tracked_items(&[WatchedItem::file("/data/doc.txt")])
            .unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].path, PathBuf::from("/data/doc.txt"));
    }

    #[test]
    fn test_prune_empty_files() {
        let (_dir, catalog, _store) = fixture();
        // A file record with no versions can only arise mid-cleanup; force one.
        {
            let guard = catalog.conn.lock();
            guard
                .execute(
                    "INSERT INTO tracked_files (path) VALUES ('/data/ghost.txt')",
                    [],
                )
                .unwrap();
        }
        let removed = catalog.prune_empty_files().unwrap();
        assert_eq!(removed, vec![PathBuf::from("/data/ghost.txt")]);
        assert!(catalog.list_files().unwrap().is_empty());
    }
}
