//! Encrypted-at-rest storage for keys and secrets.
//!
//! A [`Store`] is unlocked with a password (stretched with Argon2) or a raw
//! key. Each profile in it holds entries (`category`, `name`, value, tags)
//! and keys; both are readable only through a [`Session`].
//!
//! ```text
//! password + salt ─► master key ─► unwraps profile key ─► field sub-keys
//!                                                          │
//!                  Session: insert / fetch / fetch_all ◄───┘
//! ```
//!
//! - Values are encrypted with a random nonce and bound to their category and name
//! - Categories, names and tags are encrypted deterministically so they can
//!   be matched without decryption; see [`TagQuery`]
//! - Transactions commit all-or-nothing; overlapping commits fail with a
//!   retryable [`VaultError::Conflict`]

mod entry;
mod error;
mod key_method;
mod profile_key;
mod session;
mod store;
mod wql;

pub use entry::{Entry, EntryList, EntryTag, KeyEntry, KeyEntryList, RecordIter, RecordList};
pub use error::{ErrorKind, VaultError, VaultResult};
pub use key_method::{PassKey, StoreKeyMethod, generate_raw_key};
pub use session::{Session, SessionState};
pub use store::Store;
pub use wql::{TagQuery, TagQueryName};

pub use strongbox_crypto::{Key, KeyAlg};
pub use strongbox_storage::DuckDbConfig;
