//! Record persistence for Strongbox.
//!
//! Stores opaque, already-encrypted records behind the [`Backend`] trait and
//! knows nothing about keys or plaintext.
//!
//! # Architecture
//!
//! - Reads go through a [`Snapshot`]: a consistent view as of one commit version
//! - Writes are collected into a [`WriteBatch`] and applied all-or-nothing
//! - Commits are optimistic: a batch fails with a conflict when anything it
//!   read or writes was changed by a commit after its snapshot
//! - Tag filters are evaluated over ciphertext, in insertion order
//!
//! Two backends are provided: [`MemoryBackend`] and [`DuckDbBackend`],
//! selected by URI with [`open_backend`].

mod backend;
mod duckdb_backend;
mod error;
mod filter;
mod memory;
mod record;

pub use backend::{Backend, CONFLICT_HISTORY_VERSIONS, ScanQuery, Snapshot, WriteBatch, WriteOp};
pub use duckdb_backend::DuckDbBackend;
pub use error::{StorageError, StorageResult};
pub use filter::{TagFilter, TagName, like};
pub use memory::MemoryBackend;
pub use record::{
    ConflictKey, RecordKey, RecordKind, StoredRecord, StoredTag, decode_tags, encode_tags,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Resource caps applied to every DuckDB connection.
///
/// DuckDB defaults to ~80% of system RAM and all cores, which is far too
/// aggressive for an embedded key store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckDbConfig {
    pub memory_limit: String,
    pub threads: u32,
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self {
            memory_limit: "256MB".to_string(),
            threads: 2,
        }
    }
}

/// Where a store lives, parsed from a URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendUri {
    /// `memory://` or `memory:`. Every open creates a fresh, empty store.
    Memory,
    /// `duckdb://:memory:`
    DuckDbMemory,
    /// `duckdb://<path>`
    DuckDbFile(PathBuf),
}

impl BackendUri {
    pub fn parse(uri: &str) -> StorageResult<Self> {
        let (scheme, rest) = uri
            .split_once(':')
            .ok_or_else(|| StorageError::InvalidUri(format!("missing scheme: {uri}")))?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        match scheme.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "duckdb" => match rest {
                "" => Err(StorageError::InvalidUri(format!("missing database path: {uri}"))),
                ":memory:" => Ok(Self::DuckDbMemory),
                path => Ok(Self::DuckDbFile(PathBuf::from(path))),
            },
            "" => Err(StorageError::InvalidUri(format!("missing scheme: {uri}"))),
            other => Err(StorageError::UnsupportedBackend(other.to_string())),
        }
    }
}

// ============================================================================
// Opening backends
// ============================================================================

/// Opens the backend named by `uri`.
///
/// With `create == false` a file-backed store must already exist.
pub fn open_backend(
    uri: &str,
    config: &DuckDbConfig,
    create: bool,
) -> StorageResult<Arc<dyn Backend>> {
    match BackendUri::parse(uri)? {
        BackendUri::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendUri::DuckDbMemory => Ok(Arc::new(DuckDbBackend::open_in_memory(config)?)),
        BackendUri::DuckDbFile(path) => {
            if !create && !path.exists() {
                return Err(StorageError::NotFound(format!(
                    "database not found: {}",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Arc::new(DuckDbBackend::open(&path, config)?))
        }
    }
}

/// Deletes a file-backed store. Returns `false` if there was nothing to remove.
pub fn remove_backend(uri: &str) -> StorageResult<bool> {
    match BackendUri::parse(uri)? {
        BackendUri::Memory | BackendUri::DuckDbMemory => Ok(false),
        BackendUri::DuckDbFile(path) => {
            if !path.exists() {
                return Ok(false);
            }
            std::fs::remove_file(&path)?;
            let wal_path = wal_path(&path);
            if wal_path.exists() {
                std::fs::remove_file(&wal_path)?;
            }
            info!("removed duckdb store at {}", path.display());
            Ok(true)
        }
    }
}

fn wal_path(path: &Path) -> PathBuf {
    path.with_extension(
        path.extension()
            .map(|ext| format!("{}.wal", ext.to_string_lossy()))
            .unwrap_or_else(|| "wal".to_string()),
    )
}

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once. This handles the common case
/// where an unclean shutdown leaves a WAL file that prevents reopening.
pub fn open_duckdb_with_wal_recovery(
    path: &Path,
    config: &DuckDbConfig,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = wal_path(path);
            if wal_path.exists() {
                warn!(
                    "DuckDB open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, config)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, config)?;
    Ok(conn)
}

/// Apply memory and thread limits to a DuckDB connection.
fn apply_resource_limits(conn: &duckdb::Connection, config: &DuckDbConfig) -> StorageResult<()> {
    if !config
        .memory_limit
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.')
    {
        return Err(StorageError::InvalidUri(format!(
            "invalid memory_limit: {}",
            config.memory_limit
        )));
    }
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        config.memory_limit,
        config.threads.max(1)
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uris() {
        assert_eq!(BackendUri::parse("memory://").unwrap(), BackendUri::Memory);
        assert_eq!(BackendUri::parse("memory:").unwrap(), BackendUri::Memory);
        assert_eq!(
            BackendUri::parse("duckdb://:memory:").unwrap(),
            BackendUri::DuckDbMemory
        );
        assert_eq!(
            BackendUri::parse("duckdb:///tmp/x.db").unwrap(),
            BackendUri::DuckDbFile(PathBuf::from("/tmp/x.db"))
        );
    }

    #[test]
    fn bad_uris() {
        assert!(matches!(
            BackendUri::parse("postgres://localhost"),
            Err(StorageError::UnsupportedBackend(_))
        ));
        assert!(matches!(BackendUri::parse("no-scheme"), Err(StorageError::InvalidUri(_))));
        assert!(matches!(BackendUri::parse("duckdb://"), Err(StorageError::InvalidUri(_))));
    }

    #[test]
    fn wal_path_appends_extension() {
        assert_eq!(wal_path(Path::new("a/store.db")), PathBuf::from("a/store.db.wal"));
        assert_eq!(wal_path(Path::new("a/store")), PathBuf::from("a/store.wal"));
    }

    #[test]
    fn config_defaults() {
        let config: DuckDbConfig = serde_json::from_str("{}").unwrap_or_default();
        assert_eq!(config, DuckDbConfig::default());
    }
}
