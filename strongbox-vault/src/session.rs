//! Sessions: snapshot reads and batched, optimistic write transactions.
//!
//! A session reads from the snapshot taken when it began. A transaction
//! additionally keeps its writes in memory, overlaid on that snapshot for its
//! own reads, and hands them to the backend as one batch on commit. The batch
//! fails with a retryable conflict when anything it wrote, or read with
//! `for_update`, was changed by another commit in the meantime.

use crate::entry::{Decoder, Entry, EntryList, EntryTag, KeyEntry, KeyEntryList};
use crate::error::{VaultError, VaultResult};
use crate::profile_key::ProfileKey;
use crate::store::StoreInner;
use crate::wql::TagQuery;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use strongbox_crypto::{CryptoError, Key, KeyAlg};
use strongbox_storage::{
    ConflictKey, RecordKey, RecordKind, ScanQuery, Snapshot, StoredRecord, WriteBatch, WriteOp,
};
use tracing::{debug, warn};

/// Category under which key entries are stored.
const KEY_CATEGORY: &str = "key";
/// Prefix of tags maintained by the store on key entries.
const SYSTEM_TAG_PREFIX: &str = "sys:";
const ALG_TAG: &str = "sys:alg";
const THUMBPRINT_TAG: &str = "sys:thumbprint";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Committed,
    RolledBack,
    Closed,
}

/// Writes not yet committed, in first-write order. `None` marks a removal.
#[derive(Default)]
struct PendingWrites {
    order: Vec<RecordKey>,
    writes: HashMap<RecordKey, Option<StoredRecord>>,
}

impl PendingWrites {
    fn set(&mut self, key: RecordKey, record: Option<StoredRecord>) {
        if !self.writes.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.writes.insert(key, record);
    }

    fn get(&self, key: &RecordKey) -> Option<&Option<StoredRecord>> {
        self.writes.get(key)
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.writes.clear();
    }

    fn into_ops(mut self, profile: &str) -> Vec<WriteOp> {
        self.order
            .into_iter()
            .filter_map(|key| match self.writes.remove(&key)? {
                Some(record) => Some(WriteOp::Put {
                    profile: profile.to_string(),
                    record,
                }),
                None => Some(WriteOp::Remove { key }),
            })
            .collect()
    }
}

/// Value of a key entry before encryption.
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
    /// Base64 of the key wrapped under the profile's key-wrapping key.
    key: String,
}

/// A unit of work on one profile of a store.
pub struct Session {
    store: Arc<StoreInner>,
    profile: String,
    writable: bool,
    state: SessionState,
    snapshot: Box<dyn Snapshot>,
    pending: PendingWrites,
    read_set: BTreeSet<ConflictKey>,
}

impl Session {
    pub(crate) fn begin(store: Arc<StoreInner>, profile: String, writable: bool) -> VaultResult<Self> {
        let snapshot = store.snapshot()?;
        if snapshot.profile(&profile)?.is_none() {
            return Err(VaultError::NotFound(format!("profile {profile}")));
        }
        store.with_profile_key(&profile, |_| Ok(()))?;
        debug!(profile = %profile, writable, version = snapshot.version(), "session started");
        Ok(Self {
            store,
            profile,
            writable,
            state: SessionState::Active,
            snapshot,
            pending: PendingWrites::default(),
            read_set: BTreeSet::new(),
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn is_transaction(&self) -> bool {
        self.writable
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn check_active(&self) -> VaultResult<()> {
        match self.state {
            SessionState::Active => Ok(()),
            state => Err(VaultError::Input(format!("session is {state:?}"))),
        }
    }

    fn check_writable(&self) -> VaultResult<()> {
        self.check_active()?;
        if !self.writable {
            return Err(VaultError::Input("session is read-only".into()));
        }
        Ok(())
    }

    /// `for_update` only has an effect inside a transaction.
    fn locks_reads(&self, for_update: bool) -> bool {
        for_update && self.writable
    }

    fn with_key<R>(&self, f: impl FnOnce(&ProfileKey) -> VaultResult<R>) -> VaultResult<R> {
        self.store.with_profile_key(&self.profile, f)
    }

    fn record_key(&self, kind: RecordKind, category: &str, name: &str) -> VaultResult<RecordKey> {
        let (category, name) =
            self.with_key(|key| Ok((key.encrypt_category(category)?, key.encrypt_name(name)?)))?;
        Ok(RecordKey::new(&self.profile, kind, category, name))
    }

    // ========================================================================
    // Transaction view
    // ========================================================================

    fn view_fetch(&self, key: &RecordKey) -> VaultResult<Option<StoredRecord>> {
        match self.pending.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.snapshot.fetch(key)?),
        }
    }

    /// Scans the snapshot with this session's pending writes applied.
    fn view_scan(&self, query: &ScanQuery) -> VaultResult<Vec<StoredRecord>> {
        if self.pending.is_empty() {
            return Ok(self.snapshot.scan(query)?);
        }
        let base = ScanQuery {
            filter: None,
            offset: 0,
            limit: None,
            ..query.clone()
        };
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for record in self.snapshot.scan(&base)? {
            let key = record.key(&self.profile);
            let current = match self.pending.get(&key) {
                Some(pending) => pending.clone(),
                None => Some(record),
            };
            seen.insert(key);
            merged.extend(current.filter(|r| query.accepts(r)));
        }
        for key in &self.pending.order {
            if seen.contains(key) {
                continue;
            }
            if let Some(Some(record)) = self.pending.get(key) {
                if query.accepts(record) {
                    merged.push(record.clone());
                }
            }
        }
        let merged = merged.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => merged.take(limit).collect(),
            None => merged.collect(),
        })
    }

    fn scan_query(
        &self,
        kind: RecordKind,
        category: Option<&str>,
        tag_filter: Option<&TagQuery>,
    ) -> VaultResult<ScanQuery> {
        let (category, filter) = self.with_key(|key| {
            let category = category.map(|c| key.encrypt_category(c)).transpose()?;
            let filter = tag_filter.map(|q| q.encode(key)).transpose()?;
            Ok((category, filter))
        })?;
        let mut query = ScanQuery::new(&self.profile, kind).filter(filter);
        query.category = category;
        Ok(query)
    }

    fn lock_records(&mut self, records: &[StoredRecord]) {
        for record in records {
            self.read_set
                .insert(ConflictKey::Record(record.key(&self.profile)));
        }
    }

    fn entry_decoder(&self) -> Arc<Decoder<Entry>> {
        let store = Arc::clone(&self.store);
        let profile = self.profile.clone();
        Arc::new(move |record: &StoredRecord| {
            store.with_profile_key(&profile, |key| decrypt_entry(key, record))
        })
    }

    fn key_decoder(&self) -> Arc<Decoder<KeyEntry>> {
        let store = Arc::clone(&self.store);
        let profile = self.profile.clone();
        Arc::new(move |record: &StoredRecord| {
            store.with_profile_key(&profile, |key| decrypt_key_entry(key, record))
        })
    }

    // ========================================================================
    // Entries
    // ========================================================================

    /// Looks up one entry. With `for_update` in a transaction, commit fails
    /// if the entry is changed (or created) by another transaction first.
    /// Read-only sessions ignore the flag.
    pub fn fetch(
        &mut self,
        category: &str,
        name: &str,
        for_update: bool,
    ) -> VaultResult<Option<Entry>> {
        self.check_active()?;
        let key = self.record_key(RecordKind::Item, category, name)?;
        if self.locks_reads(for_update) {
            self.read_set.insert(ConflictKey::Record(key.clone()));
        }
        match self.view_fetch(&key)? {
            Some(record) => Ok(Some(self.with_key(|k| decrypt_entry(k, &record))?)),
            None => Ok(None),
        }
    }

    /// Entries in insertion order, optionally restricted to a category and a
    /// tag query. Values are decrypted as the list is read.
    pub fn fetch_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagQuery>,
        limit: Option<usize>,
        offset: Option<usize>,
        for_update: bool,
    ) -> VaultResult<EntryList> {
        self.check_active()?;
        let query = self
            .scan_query(RecordKind::Item, category, tag_filter)?
            .offset(offset.unwrap_or(0))
            .limit(limit);
        let records = self.view_scan(&query)?;
        if self.locks_reads(for_update) {
            self.lock_records(&records);
        }
        Ok(EntryList::new(records, self.entry_decoder()))
    }

    pub fn count(&self, category: Option<&str>, tag_filter: Option<&TagQuery>) -> VaultResult<usize> {
        self.check_active()?;
        let query = self.scan_query(RecordKind::Item, category, tag_filter)?;
        Ok(self.view_scan(&query)?.len())
    }

    /// Adds an entry; fails with `Duplicate` if it already exists in this session's view.
    pub fn insert(
        &mut self,
        category: &str,
        name: &str,
        value: &[u8],
        tags: &[EntryTag],
    ) -> VaultResult<()> {
        self.check_writable()?;
        let record = self.with_key(|key| {
            encrypt_record(key, RecordKind::Item, category, name, value, tags)
        })?;
        let key = record.key(&self.profile);
        if self.view_fetch(&key)?.is_some() {
            return Err(VaultError::Duplicate(format!("entry {category}/{name}")));
        }
        self.pending.set(key, Some(record));
        Ok(())
    }

    /// Overwrites an existing entry's value and tags.
    pub fn replace(
        &mut self,
        category: &str,
        name: &str,
        value: &[u8],
        tags: &[EntryTag],
    ) -> VaultResult<()> {
        self.check_writable()?;
        let record = self.with_key(|key| {
            encrypt_record(key, RecordKind::Item, category, name, value, tags)
        })?;
        let key = record.key(&self.profile);
        if self.view_fetch(&key)?.is_none() {
            return Err(VaultError::NotFound(format!("entry {category}/{name}")));
        }
        self.pending.set(key, Some(record));
        Ok(())
    }

    pub fn remove(&mut self, category: &str, name: &str) -> VaultResult<()> {
        self.check_writable()?;
        let key = self.record_key(RecordKind::Item, category, name)?;
        if self.view_fetch(&key)?.is_none() {
            return Err(VaultError::NotFound(format!("entry {category}/{name}")));
        }
        self.pending.set(key, None);
        Ok(())
    }

    /// Removes every matching entry and returns how many were removed.
    pub fn remove_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagQuery>,
    ) -> VaultResult<usize> {
        self.check_writable()?;
        let query = self.scan_query(RecordKind::Item, category, tag_filter)?;
        let records = self.view_scan(&query)?;
        for record in &records {
            self.pending.set(record.key(&self.profile), None);
        }
        Ok(records.len())
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// Stores a key under `name`, wrapped by the profile's key-wrapping key.
    pub fn insert_key(
        &mut self,
        name: &str,
        key: &Key,
        metadata: Option<&str>,
        reference: Option<&str>,
        tags: &[EntryTag],
    ) -> VaultResult<()> {
        self.check_writable()?;
        check_user_tags(tags)?;
        let record = self.with_key(|pk| {
            let value = KeyRecord {
                metadata: metadata.map(str::to_string),
                reference: reference.map(str::to_string),
                key: STANDARD.encode(pk.wrap_key(key)?),
            };
            encrypt_key_record(pk, name, key, &value, tags)
        })?;
        let record_key = record.key(&self.profile);
        if self.view_fetch(&record_key)?.is_some() {
            return Err(VaultError::Duplicate(format!("key {name}")));
        }
        self.pending.set(record_key, Some(record));
        Ok(())
    }

    pub fn fetch_key(&mut self, name: &str, for_update: bool) -> VaultResult<Option<KeyEntry>> {
        self.check_active()?;
        let key = self.record_key(RecordKind::Kms, KEY_CATEGORY, name)?;
        if self.locks_reads(for_update) {
            self.read_set.insert(ConflictKey::Record(key.clone()));
        }
        match self.view_fetch(&key)? {
            Some(record) => Ok(Some(self.with_key(|k| decrypt_key_entry(k, &record))?)),
            None => Ok(None),
        }
    }

    /// Key entries filtered by algorithm, public-key thumbprint and tags.
    pub fn fetch_all_keys(
        &mut self,
        alg: Option<KeyAlg>,
        thumbprint: Option<&str>,
        tag_filter: Option<&TagQuery>,
        limit: Option<usize>,
        for_update: bool,
    ) -> VaultResult<KeyEntryList> {
        self.check_active()?;
        let mut clauses = Vec::new();
        if let Some(alg) = alg {
            clauses.push(TagQuery::eq(ALG_TAG, alg.as_str()));
        }
        if let Some(thumbprint) = thumbprint {
            clauses.push(TagQuery::eq(THUMBPRINT_TAG, thumbprint));
        }
        if let Some(filter) = tag_filter {
            clauses.push(filter.clone());
        }
        let filter = (!clauses.is_empty()).then(|| TagQuery::And(clauses));
        let query = self
            .scan_query(RecordKind::Kms, Some(KEY_CATEGORY), filter.as_ref())?
            .limit(limit);
        let records = self.view_scan(&query)?;
        if self.locks_reads(for_update) {
            self.lock_records(&records);
        }
        Ok(KeyEntryList::new(records, self.key_decoder()))
    }

    /// Replaces a key entry's metadata and tags. `None` keeps the current value.
    pub fn update_key(
        &mut self,
        name: &str,
        metadata: Option<&str>,
        tags: Option<&[EntryTag]>,
    ) -> VaultResult<()> {
        self.check_writable()?;
        if let Some(tags) = tags {
            check_user_tags(tags)?;
        }
        let record_key = self.record_key(RecordKind::Kms, KEY_CATEGORY, name)?;
        let existing = self
            .view_fetch(&record_key)?
            .ok_or_else(|| VaultError::NotFound(format!("key {name}")))?;
        let record = self.with_key(|pk| {
            let entry = decrypt_key_entry(pk, &existing)?;
            let value = KeyRecord {
                metadata: metadata.map(str::to_string).or(entry.metadata),
                reference: entry.reference,
                key: STANDARD.encode(pk.wrap_key(&entry.key)?),
            };
            let tags = tags.map(<[EntryTag]>::to_vec).unwrap_or(entry.tags);
            encrypt_key_record(pk, name, &entry.key, &value, &tags)
        })?;
        self.pending.set(record_key, Some(record));
        Ok(())
    }

    pub fn remove_key(&mut self, name: &str) -> VaultResult<()> {
        self.check_writable()?;
        let key = self.record_key(RecordKind::Kms, KEY_CATEGORY, name)?;
        if self.view_fetch(&key)?.is_none() {
            return Err(VaultError::NotFound(format!("key {name}")));
        }
        self.pending.set(key, None);
        Ok(())
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Applies every pending write atomically.
    ///
    /// On a conflict nothing is applied, the session is rolled back and the
    /// error is retryable: start a new transaction and redo the work.
    pub fn commit(&mut self) -> VaultResult<()> {
        self.check_active()?;
        if !self.writable {
            return Err(VaultError::Input("cannot commit a read-only session".into()));
        }
        let mut batch = WriteBatch::new(self.snapshot.version());
        batch.read_set = std::mem::take(&mut self.read_set);
        batch.read_set.insert(ConflictKey::Profile(self.profile.clone()));
        batch.ops = std::mem::take(&mut self.pending).into_ops(&self.profile);
        let writes = batch.ops.len();

        let result = self.store.backend().and_then(|b| Ok(b.commit(batch)?));
        match result {
            Ok(version) => {
                self.state = SessionState::Committed;
                debug!(profile = %self.profile, version, writes, "transaction committed");
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::RolledBack;
                if err.is_retryable() {
                    warn!(profile = %self.profile, "transaction conflict: {err}");
                }
                Err(err)
            }
        }
    }

    /// Discards pending writes.
    pub fn rollback(&mut self) -> VaultResult<()> {
        self.check_active()?;
        self.pending.clear();
        self.read_set.clear();
        self.state = SessionState::RolledBack;
        Ok(())
    }

    /// Ends the session. Uncommitted writes are discarded.
    pub fn close(mut self) {
        self.pending.clear();
        self.state = SessionState::Closed;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("profile", &self.profile)
            .field("writable", &self.writable)
            .field("state", &self.state)
            .field("pending", &self.pending.order.len())
            .finish()
    }
}

fn encrypt_record(
    key: &ProfileKey,
    kind: RecordKind,
    category: &str,
    name: &str,
    value: &[u8],
    tags: &[EntryTag],
) -> VaultResult<StoredRecord> {
    let category = key.encrypt_category(category)?;
    let name = key.encrypt_name(name)?;
    let value = key.encrypt_value(&category, &name, value)?;
    Ok(StoredRecord {
        kind,
        tags: key.encrypt_tags(tags)?,
        category,
        name,
        value,
    })
}

fn decrypt_entry(key: &ProfileKey, record: &StoredRecord) -> VaultResult<Entry> {
    let value = key.decrypt_value(&record.category, &record.name, &record.value)?;
    Ok(Entry {
        category: key.decrypt_category(&record.category)?,
        name: key.decrypt_name(&record.name)?,
        value,
        tags: key.decrypt_tags(&record.tags)?,
    })
}

fn encrypt_key_record(
    pk: &ProfileKey,
    name: &str,
    key: &Key,
    value: &KeyRecord,
    tags: &[EntryTag],
) -> VaultResult<StoredRecord> {
    let mut all_tags = tags.to_vec();
    all_tags.push(EntryTag::Encrypted(
        ALG_TAG.into(),
        key.algorithm().as_str().into(),
    ));
    match key.jwk_thumbprint() {
        Ok(thumbprint) => all_tags.push(EntryTag::Encrypted(THUMBPRINT_TAG.into(), thumbprint)),
        // Symmetric keys have no public JWK.
        Err(CryptoError::Unsupported(_)) => {}
        Err(e) => return Err(e.into()),
    }
    let value = zeroize::Zeroizing::new(serde_json::to_vec(value)?);
    encrypt_record(pk, RecordKind::Kms, KEY_CATEGORY, name, &value, &all_tags)
}

fn decrypt_key_entry(pk: &ProfileKey, record: &StoredRecord) -> VaultResult<KeyEntry> {
    let entry = decrypt_entry(pk, record)?;
    let value: KeyRecord = serde_json::from_slice(&entry.value)
        .map_err(|e| VaultError::Encryption(format!("corrupt key entry: {e}")))?;
    let wrapped = STANDARD
        .decode(&value.key)
        .map_err(|_| VaultError::Encryption("corrupt key entry".into()))?;
    Ok(KeyEntry {
        key: pk.unwrap_key(&wrapped)?,
        name: entry.name,
        metadata: value.metadata,
        reference: value.reference,
        tags: entry
            .tags
            .into_iter()
            .filter(|t| !t.name().starts_with(SYSTEM_TAG_PREFIX))
            .collect(),
    })
}

fn check_user_tags(tags: &[EntryTag]) -> VaultResult<()> {
    match tags.iter().find(|t| t.name().starts_with(SYSTEM_TAG_PREFIX)) {
        Some(tag) => Err(VaultError::Input(format!(
            "tag names starting with {SYSTEM_TAG_PREFIX} are reserved: {}",
            tag.name()
        ))),
        None => Ok(()),
    }
}
