//! DuckDB backend.
//!
//! Snapshots are cloned connections holding an open transaction, which gives
//! each reader a stable MVCC view. Commits run on the primary connection,
//! serialized by its mutex, inside a single transaction.

use crate::backend::{
    Backend, ScanQuery, Snapshot, SnapshotLease, SnapshotRegistry, WriteBatch, WriteOp,
    check_history,
};
use crate::error::{StorageError, StorageResult};
use crate::record::{
    ConflictKey, RecordKey, RecordKind, StoredRecord, decode_tags, encode_tags,
};
use crate::DuckDbConfig;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use duckdb::{Connection, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn unb64(column: &str, value: &str) -> StorageResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| StorageError::Corrupt(format!("{column} column: {e}")))
}

type ItemRow = (i32, String, String, Vec<u8>, Vec<u8>);

fn item_row(row: &duckdb::Row<'_>) -> duckdb::Result<ItemRow> {
    Ok((
        row.get::<_, i32>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, Vec<u8>>(3)?,
        row.get::<_, Vec<u8>>(4)?,
    ))
}

fn optional<T>(result: duckdb::Result<T>) -> StorageResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Persistent backend storing ciphertext records in DuckDB.
pub struct DuckDbBackend {
    conn: Mutex<Option<Connection>>,
    snapshots: Arc<SnapshotRegistry>,
}

impl DuckDbBackend {
    /// Opens or creates a database file.
    pub fn open(path: &Path, config: &DuckDbConfig) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, config)?;
        initialize_store_schema(&conn)?;
        info!("opened duckdb store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            snapshots: Arc::default(),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(config: &DuckDbConfig) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        crate::apply_resource_limits(&conn, config)?;
        initialize_store_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            snapshots: Arc::default(),
        })
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Corrupt("duckdb connection lock poisoned".into()))
    }
}

impl Backend for DuckDbBackend {
    fn backend_name(&self) -> &'static str {
        "duckdb"
    }

    fn snapshot(&self) -> StorageResult<Box<dyn Snapshot>> {
        let guard = self.lock()?;
        let primary = guard.as_ref().ok_or(StorageError::Closed)?;
        let conn = primary.try_clone()?;
        // Registered before the primary is released, so no commit can prune
        // history this snapshot still needs.
        conn.execute_batch("BEGIN TRANSACTION")?;
        let version = conn.query_row("SELECT version FROM sb_state", [], |row| row.get::<_, i64>(0))?;
        let lease = self.snapshots.register(version as u64);
        drop(guard);
        Ok(Box::new(DuckDbSnapshot {
            conn,
            version: version as u64,
            _lease: lease,
        }))
    }

    fn commit(&self, batch: WriteBatch) -> StorageResult<u64> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        let tx = conn.transaction()?;

        let (version, mut next_seq, mut pruned_through): (i64, i64, i64) = tx.query_row(
            "SELECT version, next_seq, pruned_through FROM sb_state",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )?;

        check_history(&batch, pruned_through as u64)?;
        for key in batch.guarded_keys() {
            let changed: Option<i64> = optional(tx.query_row(
                "SELECT version FROM sb_modified WHERE conflict_key = ?",
                params![key.encode()],
                |row| row.get::<_, i64>(0),
            ))?;
            if let Some(changed) = changed {
                if changed as u64 > batch.base_version {
                    debug!("duckdb commit conflict on {key:?} (changed at v{changed})");
                    return Err(StorageError::Conflict(format!(
                        "{} changed after v{}",
                        key.encode(),
                        batch.base_version
                    )));
                }
            }
        }
        if batch.is_empty() {
            return Ok(version as u64);
        }

        let new_version = version + 1;
        let mut touched: BTreeSet<ConflictKey> = BTreeSet::new();
        for op in batch.ops {
            touched.insert(op.conflict_key());
            match op {
                WriteOp::SetConfig { name, value } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO sb_config (name, value) VALUES (?, ?)",
                        params![name, value],
                    )?;
                }
                WriteOp::PutProfile { name, key } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO sb_profiles (name, profile_key) VALUES (?, ?)",
                        params![name, key],
                    )?;
                }
                WriteOp::RemoveProfile { name } => {
                    let removed = tx.execute("DELETE FROM sb_profiles WHERE name = ?", params![name])?;
                    if removed == 0 {
                        return Err(StorageError::NotFound(format!("profile {name}")));
                    }
                    let mut stmt =
                        tx.prepare("SELECT kind, category, name FROM sb_items WHERE profile = ?")?;
                    let rows: Vec<(i32, String, String)> = stmt
                        .query_map(params![name], |row| {
                            Ok((
                                row.get::<_, i32>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                            ))
                        })?
                        .collect::<Result<_, _>>()?;
                    drop(stmt);
                    for (kind, category, item) in rows {
                        touched.insert(ConflictKey::Record(RecordKey::new(
                            &name,
                            RecordKind::from_code(kind)?,
                            unb64("category", &category)?,
                            unb64("name", &item)?,
                        )));
                    }
                    tx.execute("DELETE FROM sb_items WHERE profile = ?", params![name])?;
                }
                WriteOp::Put { profile, record } => {
                    let exists: Option<i32> = optional(tx.query_row(
                        "SELECT 1 FROM sb_profiles WHERE name = ?",
                        params![profile],
                        |row| row.get::<_, i32>(0),
                    ))?;
                    if exists.is_none() {
                        return Err(StorageError::NotFound(format!("profile {profile}")));
                    }
                    next_seq += 1;
                    tx.execute(
                        "INSERT INTO sb_items (profile, kind, category, name, value, tags, seq) \
                         VALUES (?, ?, ?, ?, ?, ?, ?) \
                         ON CONFLICT (profile, kind, category, name) \
                         DO UPDATE SET value = excluded.value, tags = excluded.tags",
                        params![
                            profile,
                            record.kind.code(),
                            b64(&record.category),
                            b64(&record.name),
                            record.value,
                            encode_tags(&record.tags),
                            next_seq,
                        ],
                    )?;
                }
                WriteOp::Remove { key } => {
                    tx.execute(
                        "DELETE FROM sb_items WHERE profile = ? AND kind = ? AND category = ? AND name = ?",
                        params![key.profile, key.kind.code(), b64(&key.category), b64(&key.name)],
                    )?;
                }
            }
        }

        for key in &touched {
            tx.execute(
                "INSERT OR REPLACE INTO sb_modified (conflict_key, version) VALUES (?, ?)",
                params![key.encode(), new_version],
            )?;
        }
        let floor = self.snapshots.prune_floor(new_version as u64) as i64;
        if floor > pruned_through {
            tx.execute("DELETE FROM sb_modified WHERE version <= ?", params![floor])?;
            pruned_through = floor;
        }
        tx.execute(
            "UPDATE sb_state SET version = ?, next_seq = ?, pruned_through = ?",
            params![new_version, next_seq, pruned_through],
        )?;
        tx.commit()?;
        Ok(new_version as u64)
    }

    fn conflict_history_len(&self) -> StorageResult<usize> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        let count = conn.query_row("SELECT COUNT(*) FROM sb_modified", [], |row| row.get::<_, i64>(0))?;
        Ok(count as usize)
    }

    fn close(&self) -> StorageResult<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                warn!("duckdb close failed: {e}");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

struct DuckDbSnapshot {
    conn: Connection,
    version: u64,
    _lease: SnapshotLease,
}

impl DuckDbSnapshot {
    fn read_record(&self, row: ItemRow) -> StorageResult<StoredRecord> {
        let (kind, category, name, value, tags) = row;
        Ok(StoredRecord {
            kind: RecordKind::from_code(kind)?,
            category: unb64("category", &category)?,
            name: unb64("name", &name)?,
            value,
            tags: decode_tags(&tags)?,
        })
    }
}

impl Snapshot for DuckDbSnapshot {
    fn version(&self) -> u64 {
        self.version
    }

    fn config(&self, name: &str) -> StorageResult<Option<String>> {
        optional(self.conn.query_row(
            "SELECT value FROM sb_config WHERE name = ?",
            params![name],
            |row| row.get::<_, String>(0),
        ))
    }

    fn profile(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        optional(self.conn.query_row(
            "SELECT profile_key FROM sb_profiles WHERE name = ?",
            params![name],
            |row| row.get::<_, Vec<u8>>(0),
        ))
    }

    fn list_profiles(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM sb_profiles ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn fetch(&self, key: &RecordKey) -> StorageResult<Option<StoredRecord>> {
        let row = optional(self.conn.query_row(
            "SELECT kind, category, name, value, tags FROM sb_items \
             WHERE profile = ? AND kind = ? AND category = ? AND name = ?",
            params![key.profile, key.kind.code(), b64(&key.category), b64(&key.name)],
            item_row,
        ))?;
        row.map(|r| self.read_record(r)).transpose()
    }

    fn scan(&self, query: &ScanQuery) -> StorageResult<Vec<StoredRecord>> {
        let mut sql = String::from(
            "SELECT kind, category, name, value, tags FROM sb_items WHERE profile = ? AND kind = ?",
        );
        let category = query.category.as_deref().map(b64);
        if category.is_some() {
            sql.push_str(" AND category = ?");
        }
        sql.push_str(" ORDER BY seq");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows: Vec<ItemRow> = match &category {
            Some(category) => stmt
                .query_map(params![query.profile, query.kind.code(), category], item_row)?
                .collect::<Result<_, _>>()?,
            None => stmt
                .query_map(params![query.profile, query.kind.code()], item_row)?
                .collect::<Result<_, _>>()?,
        };
        drop(stmt);

        // Tag predicates run here, against the stored ciphertexts.
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = self.read_record(row)?;
            if query.accepts(&record) {
                records.push(record);
            }
        }
        Ok(query.window(records.into_iter()))
    }
}

impl Drop for DuckDbSnapshot {
    fn drop(&mut self) {
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            debug!("snapshot rollback failed: {e}");
        }
    }
}

fn initialize_store_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sb_state (
            version BIGINT NOT NULL,
            next_seq BIGINT NOT NULL,
            pruned_through BIGINT NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sb_config (
            name VARCHAR PRIMARY KEY,
            value VARCHAR NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sb_profiles (
            name VARCHAR PRIMARY KEY,
            profile_key BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sb_items (
            profile VARCHAR NOT NULL,
            kind INTEGER NOT NULL,
            category VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            value BLOB NOT NULL,
            tags BLOB NOT NULL,
            seq BIGINT NOT NULL,
            PRIMARY KEY (profile, kind, category, name)
        );
        CREATE INDEX IF NOT EXISTS idx_sb_items_seq ON sb_items(profile, kind, seq);

        CREATE TABLE IF NOT EXISTS sb_modified (
            conflict_key VARCHAR PRIMARY KEY,
            version BIGINT NOT NULL
        );
        "#,
    )?;
    let has_state = conn.query_row("SELECT COUNT(*) FROM sb_state", [], |row| row.get::<_, i64>(0))?;
    if has_state == 0 {
        conn.execute(
            "INSERT INTO sb_state (version, next_seq, pruned_through) VALUES (0, 0, 0)",
            [],
        )?;
    }
    Ok(())
}
