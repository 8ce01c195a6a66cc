//! Decrypted entries and the lists returned by queries.

use crate::error::VaultResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strongbox_crypto::{Key, KeyAlg};
use strongbox_storage::StoredRecord;
use zeroize::Zeroizing;

/// A search tag attached to an entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryTag {
    /// Name and value are stored with deterministic encryption.
    Encrypted(String, String),
    /// Name and value are stored as given. Required for range and `$like` queries.
    Plaintext(String, String),
}

impl EntryTag {
    /// Builds a tag from its query-language name: a leading `~` marks a plaintext tag.
    pub fn parse(name: &str, value: impl Into<String>) -> Self {
        match name.strip_prefix('~') {
            Some(name) => Self::Plaintext(name.to_string(), value.into()),
            None => Self::Encrypted(name.to_string(), value.into()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Encrypted(name, _) | Self::Plaintext(name, _) => name,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Encrypted(_, value) | Self::Plaintext(_, value) => value,
        }
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self, Self::Plaintext(..))
    }
}

/// A decrypted record.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    pub category: String,
    pub name: String,
    pub value: Zeroizing<Vec<u8>>,
    pub tags: Vec<EntryTag>,
}

impl Entry {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
        tags: Vec<EntryTag>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            value: Zeroizing::new(value.into()),
            tags,
        }
    }

    /// Tags sorted by name and value, for order-insensitive comparison.
    pub fn sorted_tags(&self) -> Vec<&EntryTag> {
        let mut tags: Vec<&EntryTag> = self.tags.iter().collect();
        tags.sort_by(|a, b| (a.name(), a.value()).cmp(&(b.name(), b.value())));
        tags
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("category", &self.category)
            .field("name", &self.name)
            .field("value", &format_args!("[{} bytes]", self.value.len()))
            .field("tags", &self.tags)
            .finish()
    }
}

/// A stored key with its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEntry {
    pub name: String,
    pub metadata: Option<String>,
    pub reference: Option<String>,
    pub tags: Vec<EntryTag>,
    pub(crate) key: Key,
}

impl KeyEntry {
    pub fn algorithm(&self) -> KeyAlg {
        self.key.algorithm()
    }

    pub fn is_local(&self) -> bool {
        self.reference.is_none()
    }

    /// The stored key. Public-only entries load as public keys.
    pub fn load_key(&self) -> Key {
        self.key.clone()
    }
}

pub(crate) type Decoder<T> = dyn Fn(&StoredRecord) -> VaultResult<T> + Send + Sync;

/// Query results held encrypted and decrypted on iteration.
///
/// The list is a snapshot taken when the query ran; it does not follow later
/// commits. Iterating again starts from the beginning.
pub struct RecordList<T> {
    records: Vec<StoredRecord>,
    decode: Arc<Decoder<T>>,
}

/// Entries returned by a query.
pub type EntryList = RecordList<Entry>;

/// Key entries returned by a query.
pub type KeyEntryList = RecordList<KeyEntry>;

impl<T> RecordList<T> {
    pub(crate) fn new(records: Vec<StoredRecord>, decode: Arc<Decoder<T>>) -> Self {
        Self { records, decode }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decrypts the record at `index`.
    pub fn get(&self, index: usize) -> Option<VaultResult<T>> {
        self.records.get(index).map(|r| (self.decode)(r))
    }

    pub fn iter(&self) -> RecordIter<'_, T> {
        RecordIter {
            list: self,
            position: 0,
        }
    }

    /// Decrypts every record, failing on the first error.
    pub fn to_vec(&self) -> VaultResult<Vec<T>> {
        self.iter().collect()
    }
}

impl<T> fmt::Debug for RecordList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordList")
            .field("len", &self.records.len())
            .finish()
    }
}

pub struct RecordIter<'a, T> {
    list: &'a RecordList<T>,
    position: usize,
}

impl<T> Iterator for RecordIter<'_, T> {
    type Item = VaultResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.list.get(self.position)?;
        self.position += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for RecordIter<'_, T> {}

impl<'a, T> IntoIterator for &'a RecordList<T> {
    type Item = VaultResult<T>;
    type IntoIter = RecordIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
