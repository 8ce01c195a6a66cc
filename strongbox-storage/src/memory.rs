//! In-memory backend.
//!
//! The whole store is an immutable value behind an `Arc`. Snapshots clone the
//! `Arc`; commits build a modified copy and swap it in under the write lock,
//! so readers are never blocked by a commit and never see a partial one.

use crate::backend::{
    Backend, ScanQuery, Snapshot, SnapshotLease, SnapshotRegistry, WriteBatch, WriteOp,
    check_history,
};
use crate::error::{StorageError, StorageResult};
use crate::record::{ConflictKey, RecordKey, StoredRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Clone, Debug, Default)]
struct MemoryState {
    version: u64,
    next_seq: u64,
    config: BTreeMap<String, String>,
    profiles: BTreeMap<String, Vec<u8>>,
    records: BTreeMap<RecordKey, (u64, StoredRecord)>,
    /// Version of the last commit that touched each key, removals included.
    modified: HashMap<ConflictKey, u64>,
    /// Entries at or below this version have been dropped from `modified`.
    pruned_through: u64,
}

impl MemoryState {
    fn apply(&mut self, op: WriteOp) -> StorageResult<()> {
        match op {
            WriteOp::SetConfig { name, value } => {
                self.config.insert(name, value);
            }
            WriteOp::PutProfile { name, key } => {
                self.profiles.insert(name, key);
            }
            WriteOp::RemoveProfile { name } => {
                if self.profiles.remove(&name).is_none() {
                    return Err(StorageError::NotFound(format!("profile {name}")));
                }
                let version = self.version;
                let removed: Vec<RecordKey> = self
                    .records
                    .keys()
                    .filter(|k| k.profile == name)
                    .cloned()
                    .collect();
                for key in removed {
                    self.records.remove(&key);
                    self.modified.insert(ConflictKey::Record(key), version);
                }
            }
            WriteOp::Put { profile, record } => {
                if !self.profiles.contains_key(&profile) {
                    return Err(StorageError::NotFound(format!("profile {profile}")));
                }
                let key = record.key(&profile);
                let seq = match self.records.get(&key) {
                    Some((seq, _)) => *seq,
                    None => {
                        self.next_seq += 1;
                        self.next_seq
                    }
                };
                self.records.insert(key, (seq, record));
            }
            WriteOp::Remove { key } => {
                self.records.remove(&key);
            }
        }
        Ok(())
    }
}

/// Volatile backend for tests and ephemeral stores.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<Arc<MemoryState>>,
    snapshots: Arc<SnapshotRegistry>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, Arc<MemoryState>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        self.state
            .read()
            .map_err(|_| StorageError::Corrupt("memory state lock poisoned".into()))
    }
}

impl Backend for MemoryBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn snapshot(&self) -> StorageResult<Box<dyn Snapshot>> {
        let guard = self.read_state()?;
        let state = Arc::clone(&guard);
        let lease = self.snapshots.register(state.version);
        drop(guard);
        Ok(Box::new(MemorySnapshot {
            state,
            _lease: lease,
        }))
    }

    fn commit(&self, batch: WriteBatch) -> StorageResult<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        let mut guard = self
            .state
            .write()
            .map_err(|_| StorageError::Corrupt("memory state lock poisoned".into()))?;

        check_history(&batch, guard.pruned_through)?;
        for key in batch.guarded_keys() {
            if let Some(changed) = guard.modified.get(&key) {
                if *changed > batch.base_version {
                    debug!("memory commit conflict on {key:?} (changed at v{changed})");
                    return Err(StorageError::Conflict(format!(
                        "{} changed after v{}",
                        key.encode(),
                        batch.base_version
                    )));
                }
            }
        }
        if batch.is_empty() {
            return Ok(guard.version);
        }

        let mut next = MemoryState::clone(&guard);
        next.version += 1;
        let version = next.version;
        for op in batch.ops {
            next.modified.insert(op.conflict_key(), version);
            next.apply(op)?;
        }
        let floor = self.snapshots.prune_floor(version);
        if floor > next.pruned_through {
            next.modified.retain(|_, changed| *changed > floor);
            next.pruned_through = floor;
        }
        *guard = Arc::new(next);
        Ok(version)
    }

    fn conflict_history_len(&self) -> StorageResult<usize> {
        Ok(self.read_state()?.modified.len())
    }

    fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemorySnapshot {
    state: Arc<MemoryState>,
    _lease: SnapshotLease,
}

impl Snapshot for MemorySnapshot {
    fn version(&self) -> u64 {
        self.state.version
    }

    fn config(&self, name: &str) -> StorageResult<Option<String>> {
        Ok(self.state.config.get(name).cloned())
    }

    fn profile(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.state.profiles.get(name).cloned())
    }

    fn list_profiles(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.profiles.keys().cloned().collect())
    }

    fn fetch(&self, key: &RecordKey) -> StorageResult<Option<StoredRecord>> {
        Ok(self.state.records.get(key).map(|(_, r)| r.clone()))
    }

    fn scan(&self, query: &ScanQuery) -> StorageResult<Vec<StoredRecord>> {
        let mut matched: Vec<(u64, &StoredRecord)> = self
            .state
            .records
            .iter()
            .filter(|(k, (_, r))| k.profile == query.profile && query.accepts(r))
            .map(|(_, (seq, r))| (*seq, r))
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);
        Ok(query.window(matched.into_iter().map(|(_, r)| r.clone())))
    }
}
