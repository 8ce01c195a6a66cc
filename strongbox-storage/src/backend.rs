//! The abstract persistence interface shared by every backend.

use crate::error::{StorageError, StorageResult};
use crate::filter::TagFilter;
use crate::record::{ConflictKey, RecordKey, RecordKind, StoredRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Number of most recent commits whose conflict history is always kept,
/// whether or not a snapshot still refers to them.
pub const CONFLICT_HISTORY_VERSIONS: u64 = 64;

/// A scan over one profile's records, in insertion order.
#[derive(Clone, Debug)]
pub struct ScanQuery {
    pub profile: String,
    pub kind: RecordKind,
    /// Encrypted category; `None` scans every category.
    pub category: Option<Vec<u8>>,
    pub filter: Option<TagFilter>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ScanQuery {
    pub fn new(profile: &str, kind: RecordKind) -> Self {
        Self {
            profile: profile.to_string(),
            kind,
            category: None,
            filter: None,
            offset: 0,
            limit: None,
        }
    }

    pub fn category(mut self, category: Vec<u8>) -> Self {
        self.category = Some(category);
        self
    }

    pub fn filter(mut self, filter: Option<TagFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `record` belongs in this scan, ignoring profile, offset and limit.
    pub fn accepts(&self, record: &StoredRecord) -> bool {
        record.kind == self.kind
            && self.category.as_ref().is_none_or(|c| *c == record.category)
            && self.filter.as_ref().is_none_or(|f| f.matches(&record.tags))
    }

    /// Applies offset and limit to an already filtered, ordered sequence.
    pub(crate) fn window<I: Iterator<Item = StoredRecord>>(&self, records: I) -> Vec<StoredRecord> {
        let records = records.skip(self.offset);
        match self.limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        }
    }
}

/// A single mutation in a commit.
#[derive(Clone, Debug)]
pub enum WriteOp {
    SetConfig { name: String, value: String },
    /// Creates a profile, or replaces its wrapped key when it exists.
    PutProfile { name: String, key: Vec<u8> },
    /// Removes a profile together with all of its records.
    RemoveProfile { name: String },
    /// Inserts or replaces a record. A replaced record keeps its position.
    Put { profile: String, record: StoredRecord },
    Remove { key: RecordKey },
}

impl WriteOp {
    pub fn conflict_key(&self) -> ConflictKey {
        match self {
            Self::SetConfig { name, .. } => ConflictKey::Config(name.clone()),
            Self::PutProfile { name, .. } | Self::RemoveProfile { name } => {
                ConflictKey::Profile(name.clone())
            }
            Self::Put { profile, record } => ConflictKey::Record(record.key(profile)),
            Self::Remove { key } => ConflictKey::Record(key.clone()),
        }
    }
}

/// Writes produced by one transaction, applied all-or-nothing.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    /// Version of the snapshot the transaction read from.
    pub base_version: u64,
    /// Keys whose values the transaction depends on without writing them.
    pub read_set: BTreeSet<ConflictKey>,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new(base_version: u64) -> Self {
        Self {
            base_version,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Every key that must be unchanged since `base_version` for the commit to apply.
    pub fn guarded_keys(&self) -> BTreeSet<ConflictKey> {
        let mut keys = self.read_set.clone();
        keys.extend(self.ops.iter().map(WriteOp::conflict_key));
        keys
    }
}

/// Base versions of the snapshots currently open against one backend.
///
/// Commits prune conflict history up to the oldest open snapshot, bounded
/// below by the [`CONFLICT_HISTORY_VERSIONS`] window.
#[derive(Debug, Default)]
pub(crate) struct SnapshotRegistry {
    open: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotRegistry {
    pub(crate) fn register(self: &Arc<Self>, version: u64) -> SnapshotLease {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        *open.entry(version).or_default() += 1;
        SnapshotLease {
            registry: Arc::clone(self),
            version,
        }
    }

    pub(crate) fn oldest(&self) -> Option<u64> {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        open.keys().next().copied()
    }

    /// Highest version whose conflict entries no batch can still need, once
    /// `version` is the newest commit.
    pub(crate) fn prune_floor(&self, version: u64) -> u64 {
        let window = version.saturating_sub(CONFLICT_HISTORY_VERSIONS);
        self.oldest().map_or(window, |oldest| oldest.min(window))
    }
}

/// Keeps a snapshot's base version registered until dropped.
#[derive(Debug)]
pub(crate) struct SnapshotLease {
    registry: Arc<SnapshotRegistry>,
    version: u64,
}

impl Drop for SnapshotLease {
    fn drop(&mut self) {
        let mut open = self
            .registry
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = open.get_mut(&self.version) {
            *count -= 1;
            if *count == 0 {
                open.remove(&self.version);
            }
        }
    }
}

/// Rejects a batch whose base predates the pruned conflict history.
pub(crate) fn check_history(batch: &WriteBatch, pruned_through: u64) -> StorageResult<()> {
    if batch.base_version < pruned_through
        && (!batch.read_set.is_empty() || !batch.ops.is_empty())
    {
        return Err(StorageError::Conflict(format!(
            "snapshot v{} is older than the retained history (v{pruned_through})",
            batch.base_version
        )));
    }
    Ok(())
}

/// A consistent, read-only view of a store as of one commit version.
pub trait Snapshot: Send {
    fn version(&self) -> u64;

    fn config(&self, name: &str) -> StorageResult<Option<String>>;

    /// Wrapped key of a profile, if it exists.
    fn profile(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    fn list_profiles(&self) -> StorageResult<Vec<String>>;

    fn fetch(&self, key: &RecordKey) -> StorageResult<Option<StoredRecord>>;

    fn scan(&self, query: &ScanQuery) -> StorageResult<Vec<StoredRecord>>;

    fn count(&self, query: &ScanQuery) -> StorageResult<usize> {
        let unbounded = ScanQuery {
            offset: 0,
            limit: None,
            ..query.clone()
        };
        Ok(self.scan(&unbounded)?.len())
    }
}

/// A record-persistence backend with optimistic, serialized commits.
pub trait Backend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn snapshot(&self) -> StorageResult<Box<dyn Snapshot>>;

    /// Applies a batch atomically and returns the new version.
    ///
    /// Fails with [`StorageError::Conflict`] when any guarded key changed
    /// after `batch.base_version`, or when that version is older than the
    /// retained conflict history; nothing is applied in either case.
    fn commit(&self, batch: WriteBatch) -> StorageResult<u64>;

    /// Number of keys currently remembered for conflict detection.
    fn conflict_history_len(&self) -> StorageResult<usize>;

    /// Releases the backend. Later snapshots and commits fail with `Closed`.
    fn close(&self) -> StorageResult<()>;
}
