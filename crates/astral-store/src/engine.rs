//! The storage engine: schema registry, row tables, secondary indexes,
//! foreign keys, ACLs, users, and the background flusher.
//!
//! One exclusive lock guards all shared state; every operation runs to
//! completion on the invoking thread under that lock, so operations on the
//! same engine observe linearizable ordering. Mutators set the dirty flag
//! after releasing the lock; the flusher thread observes it and rewrites
//! the snapshot file.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use astral_error::{AstralError, Result};
use astral_index::{IndexBackend, OrderedIndex, TableIndex};
use astral_types::{ForeignKey, Permissions, Row, Schema};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::acl::AccessControl;
use crate::auth::{SaltState, User};
use crate::snapshot::{self, SnapshotState};

/// Flusher timing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay after first observing the dirty flag, batching close mutations
    /// into one snapshot write.
    pub flush_batch_delay: Duration,
    /// Poll interval while the store is clean.
    pub flush_idle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_batch_delay: Duration::from_millis(50),
            flush_idle_delay: Duration::from_millis(10),
        }
    }
}

#[derive(Default)]
struct EngineInner {
    schemas: HashMap<String, Schema>,
    tables: HashMap<String, Vec<Row>>,
    /// Per-table, per-column secondary indexes.
    indexes: HashMap<String, HashMap<String, TableIndex>>,
    foreign_keys: HashMap<String, Vec<ForeignKey>>,
    acl: AccessControl,
    users: Vec<User>,
    salts: SaltState,
    current_user: Option<String>,
}

/// The embedded storage engine.
///
/// Dropping the engine signals the flusher to stop and joins it without a
/// final snapshot write; [`Database::close`] flushes pending state first.
pub struct Database {
    inner: Arc<Mutex<EngineInner>>,
    dirty: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    last_flush_error: Arc<Mutex<Option<String>>>,
    path: PathBuf,
    flusher: Option<JoinHandle<()>>,
}

/// Name of the bootstrap administrator.
pub const OWNER_NAME: &str = "Admin0";
const OWNER_PASSWORD: &str = "admin";

fn no_such_table(name: &str) -> AstralError {
    AstralError::NoSuchTable {
        name: name.to_owned(),
    }
}

impl Database {
    /// Create an engine persisting to `path` with default flusher timings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, EngineConfig::default())
    }

    /// Create an engine with explicit flusher timings.
    pub fn with_config(path: impl Into<PathBuf>, config: EngineConfig) -> Self {
        let path = path.into();
        let mut inner = EngineInner::default();
        let owner = User::new(OWNER_NAME, OWNER_PASSWORD, &inner.salts);
        inner.acl.grant(OWNER_NAME, Permissions::ALL, "");
        inner.users.push(owner);

        let inner = Arc::new(Mutex::new(inner));
        let dirty = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let last_flush_error = Arc::new(Mutex::new(None));

        let flusher = {
            let inner = Arc::clone(&inner);
            let dirty = Arc::clone(&dirty);
            let stop = Arc::clone(&stop);
            let last_flush_error = Arc::clone(&last_flush_error);
            let path = path.clone();
            std::thread::spawn(move || {
                flush_worker(&inner, &dirty, &stop, &last_flush_error, &path, &config);
            })
        };

        info!(path = %path.display(), "database initialized");
        Self {
            inner,
            dirty,
            stop,
            last_flush_error,
            path,
            flusher: Some(flusher),
        }
    }

    /// The snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    // ── Tables ──────────────────────────────────────────────────────────

    /// Register a table with the given schema.
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.schemas.contains_key(name) {
                return Err(AstralError::AlreadyExists {
                    name: name.to_owned(),
                });
            }
            inner.schemas.insert(name.to_owned(), schema);
            inner.tables.insert(name.to_owned(), Vec::new());
        }
        debug!(table = name, "table created");
        self.mark_dirty();
        Ok(())
    }

    /// Erase a table, its schema, indexes, and foreign keys. Idempotent.
    pub fn drop_table(&self, name: &str) {
        {
            let mut inner = self.inner.lock();
            inner.schemas.remove(name);
            inner.tables.remove(name);
            inner.indexes.remove(name);
            inner.foreign_keys.remove(name);
        }
        debug!(table = name, "table dropped");
        self.mark_dirty();
    }

    /// Append a row. For every indexed column the row defines, the index
    /// gains a `(value, slot)` entry in the same critical section.
    pub fn insert(&self, table: &str, row: Row) -> Result<()> {
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if !inner.tables.contains_key(table) {
                return Err(no_such_table(table));
            }
            // Best-effort referential check: only enforced when the
            // referenced table exists.
            if let Some(fks) = inner.foreign_keys.get(table) {
                for fk in fks {
                    let Some(value) = row.get(&fk.column) else {
                        continue;
                    };
                    let Some(ref_rows) = inner.tables.get(&fk.referenced_table) else {
                        continue;
                    };
                    let found = ref_rows
                        .iter()
                        .any(|r| r.get(&fk.referenced_column) == Some(value));
                    if !found {
                        return Err(AstralError::ForeignKeyViolation {
                            table: fk.referenced_table.clone(),
                            column: fk.referenced_column.clone(),
                        });
                    }
                }
            }
            let rows = inner.tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
            rows.push(row.clone());
            let slot = rows.len() - 1;
            if let Some(indexes) = inner.indexes.get_mut(table) {
                for (column, value) in &row {
                    if let Some(index) = indexes.get_mut(column) {
                        index.insert(value.clone(), slot);
                    }
                }
            }
        }
        self.mark_dirty();
        Ok(())
    }

    /// Remove every row matching the predicate, dropping the removed rows'
    /// index entries first. Returns the number of rows removed.
    ///
    /// Index entries of surviving rows whose slots shift under compaction
    /// are not re-keyed.
    pub fn delete<F>(&self, table: &str, predicate: F) -> Result<usize>
    where
        F: Fn(&Row) -> bool,
    {
        let removed = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let rows = inner.tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
            if let Some(indexes) = inner.indexes.get_mut(table) {
                for row in rows.iter() {
                    if predicate(row) {
                        for (column, value) in row {
                            if let Some(index) = indexes.get_mut(column) {
                                index.remove(value);
                            }
                        }
                    }
                }
            }
            let before = rows.len();
            rows.retain(|row| !predicate(row));
            before - rows.len()
        };
        if removed > 0 {
            debug!(table, removed, "rows deleted");
            self.mark_dirty();
        }
        Ok(removed)
    }

    /// Overwrite the given columns of every row matching the predicate,
    /// re-keying affected index entries. Returns the number of rows
    /// modified.
    pub fn update<F>(&self, table: &str, predicate: F, new_values: &Row) -> Result<usize>
    where
        F: Fn(&Row) -> bool,
    {
        let modified = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let rows = inner.tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
            let indexes = inner.indexes.entry(table.to_owned()).or_default();
            let mut modified = 0;
            for (slot, row) in rows.iter_mut().enumerate() {
                if !predicate(row) {
                    continue;
                }
                for (column, new_value) in new_values {
                    if let Some(index) = indexes.get_mut(column) {
                        let old_value = row.get(column).cloned().unwrap_or_default();
                        index.remove(&old_value);
                        index.insert(new_value.clone(), slot);
                    }
                    row.insert(column.clone(), new_value.clone());
                }
                modified += 1;
            }
            modified
        };
        if modified > 0 {
            debug!(table, modified, "rows updated");
            self.mark_dirty();
        }
        Ok(modified)
    }

    /// Rows matching the predicate, with schema defaults substituted for
    /// absent columns.
    ///
    /// When the table has indexes, iteration walks the union of all indexed
    /// slots through every index, so overlapping indexes can surface the
    /// same row more than once; otherwise rows are scanned in slot order.
    pub fn select<F>(&self, table: &str, predicate: F) -> Result<Vec<Row>>
    where
        F: Fn(&Row) -> bool,
    {
        let inner = self.inner.lock();
        let rows = inner.tables.get(table).ok_or_else(|| no_such_table(table))?;
        let schema = inner.schemas.get(table);
        let mut result = Vec::new();
        match inner.indexes.get(table) {
            Some(indexes) if !indexes.is_empty() => {
                for index in indexes.values() {
                    for key in index.keys() {
                        let Some(slot) = index.lookup(&key) else {
                            continue;
                        };
                        if slot < rows.len() && predicate(&rows[slot]) {
                            result.push(apply_defaults(schema, &rows[slot]));
                        }
                    }
                }
            }
            _ => {
                for row in rows {
                    if predicate(row) {
                        result.push(apply_defaults(schema, row));
                    }
                }
            }
        }
        Ok(result)
    }

    /// Nested-loop join: for every matching pair the combined row takes
    /// the right row and overlays the left row's columns over it.
    pub fn join<F>(&self, left: &str, right: &str, condition: F) -> Result<Vec<Row>>
    where
        F: Fn(&Row, &Row) -> bool,
    {
        let inner = self.inner.lock();
        let left_rows = inner.tables.get(left).ok_or_else(|| no_such_table(left))?;
        let right_rows = inner.tables.get(right).ok_or_else(|| no_such_table(right))?;
        let mut result = Vec::new();
        for left_row in left_rows {
            for right_row in right_rows {
                if condition(left_row, right_row) {
                    let mut combined = right_row.clone();
                    for (column, value) in left_row {
                        combined.insert(column.clone(), value.clone());
                    }
                    result.push(combined);
                }
            }
        }
        Ok(result)
    }

    /// Check a row against the table schema: required (primary-key or
    /// not-null) columns must be present, and unique columns must not
    /// collide with an indexed value. Returns `false` for unknown tables.
    pub fn validate_row(&self, table: &str, row: &Row) -> bool {
        let inner = self.inner.lock();
        let Some(schema) = inner.schemas.get(table) else {
            return false;
        };
        for column in schema {
            if column.required() && !row.contains_key(&column.name) {
                return false;
            }
            if column.unique {
                if let (Some(value), Some(indexes)) = (row.get(&column.name), inner.indexes.get(table))
                {
                    if let Some(index) = indexes.get(&column.name) {
                        if index.contains(value) {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    // ── Indexes & foreign keys ──────────────────────────────────────────

    /// Create a B+ tree index on `(table, column)` and backfill it from
    /// the existing rows. A no-op if the index already exists.
    pub fn add_index(&self, table: &str, column: &str) -> Result<()> {
        self.add_index_with(table, column, IndexBackend::BPlus)
    }

    /// Create an index on `(table, column)` using an explicit backend and
    /// backfill it from the existing rows. A no-op if the index already
    /// exists.
    pub fn add_index_with(&self, table: &str, column: &str, backend: IndexBackend) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let rows = inner.tables.get(table).ok_or_else(|| no_such_table(table))?;
        let indexes = inner.indexes.entry(table.to_owned()).or_default();
        if let Entry::Vacant(entry) = indexes.entry(column.to_owned()) {
            let index = entry.insert(TableIndex::new(backend));
            for (slot, row) in rows.iter().enumerate() {
                if let Some(value) = row.get(column) {
                    index.insert(value.clone(), slot);
                }
            }
        }
        Ok(())
    }

    /// Drop the index on `(table, column)`. Idempotent.
    pub fn remove_index(&self, table: &str, column: &str) {
        let mut inner = self.inner.lock();
        if let Some(indexes) = inner.indexes.get_mut(table) {
            indexes.remove(column);
        }
    }

    /// Record a foreign-key declaration on `table`.
    pub fn add_foreign_key(&self, table: &str, key: ForeignKey) {
        let mut inner = self.inner.lock();
        inner.foreign_keys.entry(table.to_owned()).or_default().push(key);
    }

    // ── Authorization ───────────────────────────────────────────────────

    /// OR permission bits into the ACL entry (empty table means global).
    pub fn grant(&self, user: &str, perms: Permissions, table: &str) {
        self.inner.lock().acl.grant(user, perms, table);
        self.mark_dirty();
    }

    /// AND-NOT permission bits out of the ACL entry.
    pub fn revoke(&self, user: &str, perms: Permissions, table: &str) {
        self.inner.lock().acl.revoke(user, perms, table);
        self.mark_dirty();
    }

    /// Whether the requested bits are covered by the user's table or
    /// global entry.
    pub fn has_permission(&self, user: &str, perms: Permissions, table: &str) -> bool {
        self.inner.lock().acl.has_permission(user, perms, table)
    }

    /// Effective permission bits for a user on a table.
    pub fn user_permissions(&self, user: &str, table: &str) -> Permissions {
        self.inner.lock().acl.user_permissions(user, table)
    }

    // ── Users & sessions ────────────────────────────────────────────────

    /// Register a user with a verifier derived under the current salts.
    pub fn add_user(&self, name: &str, password: &str) {
        let mut inner = self.inner.lock();
        let user = User::new(name, password, &inner.salts);
        inner.users.push(user);
    }

    /// Authenticate and set the session user. On failure the session user
    /// is left unchanged.
    pub fn authenticate_user(&self, name: &str, password: &str) -> bool {
        let mut inner = self.inner.lock();
        let ok = inner
            .users
            .iter()
            .any(|u| u.name == name && u.verify_password(password, &inner.salts));
        if ok {
            inner.current_user = Some(name.to_owned());
        }
        ok
    }

    /// Clear the session user.
    pub fn logout(&self) {
        self.inner.lock().current_user = None;
    }

    /// Whether a session user is set.
    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().current_user.is_some()
    }

    /// The session user's name, if any.
    pub fn current_user(&self) -> Option<String> {
        self.inner.lock().current_user.clone()
    }

    /// Replace the device salt.
    pub fn set_device_salt(&self, salt: Vec<u8>) {
        self.inner.lock().salts.set_device_salt(salt);
    }

    /// Replace the instance salt.
    pub fn set_instance_salt(&self, salt: Vec<u8>) {
        self.inner.lock().salts.set_instance_salt(salt);
    }

    /// Replace the session salt. Stored verifiers derived under the old
    /// salt stop verifying.
    pub fn set_session_salt(&self, salt: Vec<u8>) {
        self.inner.lock().salts.set_session_salt(salt);
    }

    /// Draw a fresh random session salt. Stored verifiers derived under
    /// the old salt stop verifying.
    pub fn regenerate_session_salt(&self) {
        self.inner.lock().salts.regenerate_session_salt();
    }

    // ── Snapshot I/O ────────────────────────────────────────────────────

    /// Serialize, compress, encrypt, and write the whole store to the
    /// snapshot file.
    pub fn sync_to_file(&self) -> Result<()> {
        let inner = self.inner.lock();
        sync_locked(&inner, &self.path)
    }

    /// Read, decrypt, decompress, and parse the snapshot file, replacing
    /// schemas and tables. On any structural error the store is left
    /// empty and the error is returned.
    pub fn load_from_file(&self) -> Result<()> {
        let bytes = std::fs::read(&self.path).map_err(|_| AstralError::FileOpen {
            path: self.path.clone(),
        })?;
        let mut inner = self.inner.lock();
        match snapshot::decode(&bytes, &inner.salts.storage_key()) {
            Ok(state) => {
                inner.schemas = state.schemas;
                inner.tables = state.tables;
                info!(path = %self.path.display(), "database loaded");
                Ok(())
            }
            Err(err) => {
                inner.schemas.clear();
                inner.tables.clear();
                Err(err)
            }
        }
    }

    /// The last error the flusher swallowed, if the most recent flush
    /// failed.
    pub fn health(&self) -> Option<String> {
        self.last_flush_error.lock().clone()
    }

    /// Whether unflushed mutations are pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Registered table names, unordered.
    pub fn table_names(&self) -> Vec<String> {
        self.inner.lock().schemas.keys().cloned().collect()
    }

    /// Schema of a table.
    pub fn schema(&self, table: &str) -> Option<Schema> {
        self.inner.lock().schemas.get(table).cloned()
    }

    /// All rows of a table in slot order.
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.inner.lock().tables.get(table).cloned()
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Flush pending state if dirty, then stop and join the flusher.
    pub fn close(mut self) -> Result<()> {
        let result = if self.dirty.load(Ordering::Acquire) {
            let outcome = self.sync_to_file();
            if outcome.is_ok() {
                self.dirty.store(false, Ordering::Release);
            }
            outcome
        } else {
            Ok(())
        };
        self.shutdown();
        result
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.flusher.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown();
        info!(path = %self.path.display(), "database shut down");
    }
}

fn apply_defaults(schema: Option<&Schema>, row: &Row) -> Row {
    let mut out = row.clone();
    if let Some(schema) = schema {
        for column in schema {
            if !column.default.is_empty() && !out.contains_key(&column.name) {
                out.insert(column.name.clone(), column.default.clone());
            }
        }
    }
    out
}

fn sync_locked(inner: &EngineInner, path: &Path) -> Result<()> {
    let state = SnapshotState {
        schemas: inner.schemas.clone(),
        tables: inner.tables.clone(),
    };
    let frame = snapshot::encode(&state, &inner.salts.storage_key());
    let mut file = std::fs::File::create(path).map_err(|_| AstralError::FileOpen {
        path: path.to_path_buf(),
    })?;
    file.write_all(&frame)?;
    debug!(path = %path.display(), bytes = frame.len(), "snapshot written");
    Ok(())
}

/// Background flusher: batch mutations for `flush_batch_delay` after the
/// dirty flag is first observed, then snapshot under the lock and clear
/// the flag. Errors are recorded in the health slot and logged, never
/// raised.
fn flush_worker(
    inner: &Mutex<EngineInner>,
    dirty: &AtomicBool,
    stop: &AtomicBool,
    last_flush_error: &Mutex<Option<String>>,
    path: &Path,
    config: &EngineConfig,
) {
    while !stop.load(Ordering::Acquire) {
        if dirty.load(Ordering::Acquire) {
            std::thread::sleep(config.flush_batch_delay);
            let guard = inner.lock();
            if dirty.load(Ordering::Acquire) {
                match sync_locked(&guard, path) {
                    Ok(()) => {
                        *last_flush_error.lock() = None;
                    }
                    Err(err) => {
                        warn!(error = %err, "background flush failed");
                        *last_flush_error.lock() = Some(err.to_string());
                    }
                }
                dirty.store(false, Ordering::Release);
            }
        } else {
            std::thread::sleep(config.flush_idle_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn scratch_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("astral.db"));
        (dir, db)
    }

    fn id_schema() -> Schema {
        vec![
            astral_types::Column {
                name: "id".to_owned(),
                primary_key: true,
                unique: true,
                not_null: true,
                default: String::new(),
            },
            astral_types::Column::plain("v"),
        ]
    }

    #[test]
    fn create_insert_select() {
        let (_dir, db) = scratch_db();
        db.create_table("t", id_schema()).unwrap();
        db.insert("t", row(&[("id", "1"), ("v", "a")])).unwrap();
        db.insert("t", row(&[("id", "2"), ("v", "b")])).unwrap();
        let rows = db.select("t", |_| true).unwrap();
        assert_eq!(rows.len(), 2);
        let rows = db.select("t", |r| r.get("id").map(String::as_str) == Some("2")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["v"], "b");
    }

    #[test]
    fn create_duplicate_rejected() {
        let (_dir, db) = scratch_db();
        db.create_table("t", Vec::new()).unwrap();
        assert!(matches!(
            db.create_table("t", Vec::new()),
            Err(AstralError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn missing_table_errors() {
        let (_dir, db) = scratch_db();
        assert!(matches!(
            db.insert("ghost", Row::new()),
            Err(AstralError::NoSuchTable { .. })
        ));
        assert!(db.select("ghost", |_| true).is_err());
        assert!(db.delete("ghost", |_| true).is_err());
        assert!(db.update("ghost", |_| true, &Row::new()).is_err());
    }

    #[test]
    fn drop_table_is_idempotent() {
        let (_dir, db) = scratch_db();
        db.create_table("t", Vec::new()).unwrap();
        db.drop_table("t");
        db.drop_table("t");
        assert!(db.select("t", |_| true).is_err());
    }

    #[test]
    fn update_rewrites_rows_and_indexes() {
        let (_dir, db) = scratch_db();
        db.create_table("t", id_schema()).unwrap();
        db.insert("t", row(&[("id", "1"), ("v", "a")])).unwrap();
        db.insert("t", row(&[("id", "2"), ("v", "b")])).unwrap();
        db.add_index("t", "v").unwrap();
        let changed = db
            .update(
                "t",
                |r| r.get("id").map(String::as_str) == Some("1"),
                &row(&[("v", "z")]),
            )
            .unwrap();
        assert_eq!(changed, 1);
        let rows = db.rows("t").unwrap();
        assert_eq!(rows[0]["v"], "z");
        assert_eq!(rows[1]["v"], "b");
    }

    #[test]
    fn delete_compacts_and_unindexes() {
        let (_dir, db) = scratch_db();
        db.create_table("t", id_schema()).unwrap();
        for (id, v) in [("1", "a"), ("2", "b"), ("3", "c")] {
            db.insert("t", row(&[("id", id), ("v", v)])).unwrap();
        }
        db.add_index("t", "id").unwrap();
        let removed = db
            .delete("t", |r| r.get("id").map(String::as_str) == Some("2"))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.rows("t").unwrap().len(), 2);
        // The deleted row's index entry is gone.
        let hits = db
            .select("t", |r| r.get("id").map(String::as_str) == Some("2"))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn sorted_backend_serves_all_mutation_paths() {
        let (_dir, db) = scratch_db();
        db.create_table("t", id_schema()).unwrap();
        for (id, v) in [("1", "a"), ("2", "b"), ("3", "c")] {
            db.insert("t", row(&[("id", id), ("v", v)])).unwrap();
        }
        db.add_index_with("t", "id", IndexBackend::Sorted).unwrap();
        // Select walks the sorted index.
        let rows = db.select("t", |_| true).unwrap();
        assert_eq!(rows.len(), 3);
        // Update re-keys through it.
        db.update(
            "t",
            |r| r.get("id").map(String::as_str) == Some("2"),
            &row(&[("id", "9")]),
        )
        .unwrap();
        let hits = db
            .select("t", |r| r.get("id").map(String::as_str) == Some("9"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        // Delete drops the removed row's entry.
        db.delete("t", |r| r.get("id").map(String::as_str) == Some("9"))
            .unwrap();
        assert!(db
            .select("t", |r| r.get("id").map(String::as_str) == Some("9"))
            .unwrap()
            .is_empty());
        // Unique checks consult it too.
        assert!(!db.validate_row("t", &row(&[("id", "1")])));
    }

    #[test]
    fn select_via_overlapping_indexes_may_duplicate() {
        let (_dir, db) = scratch_db();
        db.create_table("t", id_schema()).unwrap();
        db.insert("t", row(&[("id", "1"), ("v", "a")])).unwrap();
        db.add_index("t", "id").unwrap();
        db.add_index("t", "v").unwrap();
        let rows = db.select("t", |_| true).unwrap();
        // One row reached through two indexes.
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn select_applies_defaults() {
        let (_dir, db) = scratch_db();
        let mut schema = id_schema();
        schema[1].default = "fallback".to_owned();
        db.create_table("t", schema).unwrap();
        db.insert("t", row(&[("id", "1")])).unwrap();
        let rows = db.select("t", |_| true).unwrap();
        assert_eq!(rows[0]["v"], "fallback");
        // Stored row remains untouched.
        assert!(!db.rows("t").unwrap()[0].contains_key("v"));
    }

    #[test]
    fn validate_row_checks_constraints() {
        let (_dir, db) = scratch_db();
        db.create_table("t", id_schema()).unwrap();
        db.add_index("t", "id").unwrap();
        assert!(db.validate_row("t", &row(&[("id", "1")])));
        // Required column missing.
        assert!(!db.validate_row("t", &row(&[("v", "a")])));
        // Unique collision via the index.
        db.insert("t", row(&[("id", "1")])).unwrap();
        assert!(!db.validate_row("t", &row(&[("id", "1")])));
        assert!(db.validate_row("t", &row(&[("id", "2")])));
        // Unknown table.
        assert!(!db.validate_row("ghost", &Row::new()));
    }

    #[test]
    fn foreign_key_checked_best_effort() {
        let (_dir, db) = scratch_db();
        db.create_table("parent", Vec::new()).unwrap();
        db.create_table("child", Vec::new()).unwrap();
        db.add_foreign_key(
            "child",
            ForeignKey {
                column: "pid".to_owned(),
                referenced_table: "parent".to_owned(),
                referenced_column: "id".to_owned(),
            },
        );
        assert!(matches!(
            db.insert("child", row(&[("pid", "1")])),
            Err(AstralError::ForeignKeyViolation { .. })
        ));
        db.insert("parent", row(&[("id", "1")])).unwrap();
        db.insert("child", row(&[("pid", "1")])).unwrap();
        // Reference to a missing table is not enforced.
        db.add_foreign_key(
            "child",
            ForeignKey {
                column: "gid".to_owned(),
                referenced_table: "ghost".to_owned(),
                referenced_column: "id".to_owned(),
            },
        );
        db.insert("child", row(&[("pid", "1"), ("gid", "9")])).unwrap();
    }

    #[test]
    fn join_overlays_left_over_right() {
        let (_dir, db) = scratch_db();
        db.create_table("l", Vec::new()).unwrap();
        db.create_table("r", Vec::new()).unwrap();
        db.insert("l", row(&[("k", "1"), ("side", "left")])).unwrap();
        db.insert("r", row(&[("k", "1"), ("side", "right"), ("extra", "x")]))
            .unwrap();
        let joined = db
            .join("l", "r", |a, b| a.get("k") == b.get("k"))
            .unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0]["side"], "left");
        assert_eq!(joined[0]["extra"], "x");
    }

    #[test]
    fn acl_round_trip() {
        let (_dir, db) = scratch_db();
        db.grant("alice", Permissions::SELECT, "t");
        assert!(db.has_permission("alice", Permissions::SELECT, "t"));
        assert!(!db.has_permission("alice", Permissions::INSERT, "t"));
        db.revoke("alice", Permissions::SELECT, "t");
        assert!(!db.has_permission("alice", Permissions::SELECT, "t"));
        assert_eq!(db.user_permissions(OWNER_NAME, "any"), Permissions::ALL);
    }

    #[test]
    fn authentication_sets_session_user() {
        let (_dir, db) = scratch_db();
        db.add_user("alice", "pw");
        assert!(!db.is_authenticated());
        assert!(!db.authenticate_user("alice", "wrong"));
        assert!(!db.is_authenticated());
        assert!(db.authenticate_user("alice", "pw"));
        assert_eq!(db.current_user().as_deref(), Some("alice"));
        db.logout();
        assert!(!db.is_authenticated());
        // The bootstrap owner can authenticate too.
        assert!(db.authenticate_user(OWNER_NAME, "admin"));
    }

    #[test]
    fn session_salt_rotation_invalidates_users() {
        let (_dir, db) = scratch_db();
        db.add_user("bob", "pw");
        db.regenerate_session_salt();
        assert!(!db.authenticate_user("bob", "pw"));
    }

    #[test]
    fn snapshot_round_trip_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("astral.db");
        {
            let db = Database::new(&path);
            db.create_table("t", id_schema()).unwrap();
            db.insert("t", row(&[("id", "1"), ("v", "z")])).unwrap();
            db.close().unwrap();
        }
        let db = Database::new(&path);
        db.load_from_file().unwrap();
        let rows = db.select("t", |_| true).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["v"], "z");
        let schema = db.schema("t").unwrap();
        assert!(schema.iter().any(|c| c.name == "id" && c.primary_key));
    }

    #[test]
    fn load_failure_leaves_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("astral.db");
        std::fs::write(&path, b"definitely not a snapshot").unwrap();
        let db = Database::new(&path);
        db.create_table("t", Vec::new()).unwrap();
        assert!(db.load_from_file().is_err());
        assert!(db.table_names().is_empty());
    }

    #[test]
    fn load_missing_file_reports_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("absent.db"));
        assert!(matches!(
            db.load_from_file(),
            Err(AstralError::FileOpen { .. })
        ));
    }

    #[test]
    fn background_flusher_clears_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("astral.db");
        let db = Database::with_config(
            &path,
            EngineConfig {
                flush_batch_delay: Duration::from_millis(10),
                flush_idle_delay: Duration::from_millis(2),
            },
        );
        db.create_table("t", Vec::new()).unwrap();
        assert!(db.is_dirty());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while db.is_dirty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!db.is_dirty(), "flusher never wrote the snapshot");
        assert!(path.exists());
        assert!(db.health().is_none());
    }

    #[test]
    fn flusher_failure_surfaces_in_health() {
        let dir = tempfile::tempdir().unwrap();
        // A directory path makes every snapshot write fail.
        let db = Database::with_config(
            dir.path(),
            EngineConfig {
                flush_batch_delay: Duration::from_millis(10),
                flush_idle_delay: Duration::from_millis(2),
            },
        );
        db.create_table("t", Vec::new()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while db.health().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(db.health().is_some(), "flush failure never surfaced");
    }

    proptest! {
        /// After any sequence of inserts and updates, every indexed row is
        /// reachable through its index and the slot's value matches.
        #[test]
        fn index_consistency_under_mutation(
            ops in proptest::collection::vec((any::<bool>(), 0u8..20), 1..40)
        ) {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::new(dir.path().join("astral.db"));
            db.create_table("t", Vec::new()).unwrap();
            db.add_index("t", "c").unwrap();
            for (seq, (is_insert, key)) in ops.into_iter().enumerate() {
                let k = format!("k{key}");
                if is_insert {
                    db.insert("t", row(&[("id", &k), ("c", &format!("v{seq}"))])).unwrap();
                } else {
                    db.update(
                        "t",
                        |r| r.get("id").map(String::as_str) == Some(k.as_str()),
                        &row(&[("c", &format!("u{seq}"))]),
                    ).unwrap();
                }
            }
            let rows = db.rows("t").unwrap();
            let inner = db.inner.lock();
            let index = &inner.indexes["t"]["c"];
            for r in &rows {
                let value = &r["c"];
                let slot = index.lookup(value).expect("indexed value resolves");
                prop_assert!(slot < rows.len());
                prop_assert_eq!(&rows[slot]["c"], value);
            }
        }
    }
}
