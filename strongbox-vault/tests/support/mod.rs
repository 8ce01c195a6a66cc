//! Shared helpers for store integration tests.
#![allow(dead_code)]

use strongbox_vault::{PassKey, Store, StoreKeyMethod};

/// Argon2id with minimal costs, so password tests stay fast.
pub const CHEAP_KDF: &str = "kdf:argon2:argon2id:13:1:64:1";

/// URIs of every in-process backend.
pub const BACKENDS: [&str; 2] = ["memory://", "duckdb://:memory:"];

pub fn cheap_kdf() -> StoreKeyMethod {
    StoreKeyMethod::parse(CHEAP_KDF).unwrap()
}

pub fn raw_store(uri: &str) -> Store {
    let key = Store::generate_raw_key(None).unwrap();
    Store::provision(uri, StoreKeyMethod::RawKey, PassKey::from(key), Some("default"), false)
        .unwrap()
}

/// One freshly provisioned store per backend.
pub fn stores() -> Vec<Store> {
    BACKENDS.iter().map(|uri| raw_store(uri)).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
