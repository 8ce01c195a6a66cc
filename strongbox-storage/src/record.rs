//! Persisted record layout.
//!
//! Backends only ever see ciphertext: categories, names and encrypted tags are
//! deterministic ciphertexts, values are AEAD output. Plaintext tags are the
//! single exception and are marked as such.

use crate::error::{StorageError, StorageResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Which namespace a record lives in: ordinary entries or stored keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Item,
    Kms,
}

impl RecordKind {
    pub fn code(&self) -> i32 {
        match self {
            Self::Item => 1,
            Self::Kms => 2,
        }
    }

    pub fn from_code(code: i32) -> StorageResult<Self> {
        match code {
            1 => Ok(Self::Item),
            2 => Ok(Self::Kms),
            other => Err(StorageError::Corrupt(format!("unknown record kind {other}"))),
        }
    }
}

/// Unique identity of a record within a store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub profile: String,
    pub kind: RecordKind,
    pub category: Vec<u8>,
    pub name: Vec<u8>,
}

impl RecordKey {
    pub fn new(profile: &str, kind: RecordKind, category: Vec<u8>, name: Vec<u8>) -> Self {
        Self {
            profile: profile.to_string(),
            kind,
            category,
            name,
        }
    }
}

/// One stored tag. Encrypted tags hold deterministic ciphertexts for both
/// name and value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoredTag {
    pub plaintext: bool,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRecord {
    pub kind: RecordKind,
    pub category: Vec<u8>,
    pub name: Vec<u8>,
    /// Serialized `nonce | ciphertext | tag`.
    pub value: Vec<u8>,
    pub tags: Vec<StoredTag>,
}

impl StoredRecord {
    pub fn key(&self, profile: &str) -> RecordKey {
        RecordKey::new(profile, self.kind, self.category.clone(), self.name.clone())
    }
}

/// Anything a commit can modify, for optimistic conflict detection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConflictKey {
    Record(RecordKey),
    Profile(String),
    Config(String),
}

impl ConflictKey {
    /// Stable text form used as a database key.
    pub fn encode(&self) -> String {
        let b64 = |bytes: &[u8]| URL_SAFE_NO_PAD.encode(bytes);
        match self {
            Self::Record(key) => format!(
                "r.{}.{}.{}.{}",
                b64(key.profile.as_bytes()),
                key.kind.code(),
                b64(&key.category),
                b64(&key.name)
            ),
            Self::Profile(name) => format!("p.{}", b64(name.as_bytes())),
            Self::Config(name) => format!("c.{}", b64(name.as_bytes())),
        }
    }
}

/// Serializes tags as `count | (flag | len | name | len | value)*`, big-endian u32 lengths.
pub fn encode_tags(tags: &[StoredTag]) -> Vec<u8> {
    let size: usize = tags.iter().map(|t| 9 + t.name.len() + t.value.len()).sum();
    let mut out = Vec::with_capacity(4 + size);
    out.extend_from_slice(&(tags.len() as u32).to_be_bytes());
    for tag in tags {
        out.push(u8::from(tag.plaintext));
        out.extend_from_slice(&(tag.name.len() as u32).to_be_bytes());
        out.extend_from_slice(&tag.name);
        out.extend_from_slice(&(tag.value.len() as u32).to_be_bytes());
        out.extend_from_slice(&tag.value);
    }
    out
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        if self.buf.len() < len {
            return Err(StorageError::Corrupt("tag block truncated".into()));
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    fn u32(&mut self) -> StorageResult<usize> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
    }
}

/// Inverse of [`encode_tags`].
pub fn decode_tags(bytes: &[u8]) -> StorageResult<Vec<StoredTag>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = Reader { buf: bytes };
    let count = reader.u32()?;
    let mut tags = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let plaintext = match reader.take(1)?[0] {
            0 => false,
            1 => true,
            flag => return Err(StorageError::Corrupt(format!("bad tag flag {flag}"))),
        };
        let len = reader.u32()?;
        let name = reader.take(len)?.to_vec();
        let len = reader.u32()?;
        let value = reader.take(len)?.to_vec();
        tags.push(StoredTag {
            plaintext,
            name,
            value,
        });
    }
    if !reader.buf.is_empty() {
        return Err(StorageError::Corrupt("trailing bytes after tags".into()));
    }
    Ok(tags)
}
