//! Provisioning, unlocking, profiles, rekeying and close.

mod support;

use pretty_assertions::assert_eq;
use strongbox_vault::{ErrorKind, PassKey, Store, StoreKeyMethod, VaultError};
use support::{BACKENDS, cheap_kdf, init_tracing, raw_store, stores};

fn duckdb_uri(dir: &tempfile::TempDir) -> String {
    format!("duckdb://{}", dir.path().join("store.db").display())
}

fn put(store: &Store, profile: Option<&str>, name: &str, value: &[u8]) {
    let mut txn = store.transaction(profile).unwrap();
    txn.insert("c", name, value, &[]).unwrap();
    txn.commit().unwrap();
}

fn get(store: &Store, profile: Option<&str>, name: &str) -> Option<Vec<u8>> {
    store
        .session(profile)
        .unwrap()
        .fetch("c", name, false)
        .unwrap()
        .map(|e| e.value.to_vec())
}

// ── Unlocking ──

#[test]
fn password_store_reopens_with_same_password() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let uri = duckdb_uri(&dir);

    let store = Store::provision(&uri, cheap_kdf(), PassKey::from("correct horse"), None, false)
        .unwrap();
    let profile = store.profile_name().to_string();
    put(&store, None, "n", b"persisted");
    store.close().unwrap();

    let store = Store::open(&uri, None, PassKey::from("correct horse"), None).unwrap();
    assert_eq!(store.profile_name(), profile);
    assert_eq!(store.key_method().unwrap(), cheap_kdf());
    assert_eq!(get(&store, None, "n"), Some(b"persisted".to_vec()));
    store.close().unwrap();
}

#[test]
fn wrong_password_is_authentication_error() {
    let dir = tempfile::tempdir().unwrap();
    let uri = duckdb_uri(&dir);
    Store::provision(&uri, cheap_kdf(), PassKey::from("right"), None, false)
        .unwrap()
        .close()
        .unwrap();

    let err = Store::open(&uri, None, PassKey::from("wrong"), None).unwrap_err();
    assert!(matches!(err, VaultError::Authentication(_)), "{err}");
    let err = Store::open(&uri, None, PassKey::empty(), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[test]
fn wrong_raw_key_is_authentication_error() {
    let dir = tempfile::tempdir().unwrap();
    let uri = duckdb_uri(&dir);
    let key = Store::generate_raw_key(None).unwrap();
    Store::provision(&uri, StoreKeyMethod::RawKey, PassKey::from(key.as_str()), None, false)
        .unwrap()
        .close()
        .unwrap();

    let other = Store::generate_raw_key(None).unwrap();
    let err = Store::open(&uri, None, PassKey::from(other), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let err = Store::open(&uri, None, PassKey::from("not base58!"), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);

    let err = Store::open(&uri, Some(cheap_kdf()), PassKey::from(key.as_str()), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);

    Store::open(&uri, Some(StoreKeyMethod::RawKey), PassKey::from(key), None)
        .unwrap()
        .close()
        .unwrap();
}

#[test]
fn open_missing_store_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = Store::open(&duckdb_uri(&dir), None, PassKey::from("pw"), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = Store::open("memory://", None, PassKey::from("pw"), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn bad_uris() {
    let key = PassKey::from(Store::generate_raw_key(None).unwrap());
    let err = Store::provision("postgres://db", StoreKeyMethod::RawKey, key.clone(), None, false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    let err = Store::provision("nonsense", StoreKeyMethod::RawKey, key, None, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[test]
fn provision_existing_store_opens_or_recreates() {
    let dir = tempfile::tempdir().unwrap();
    let uri = duckdb_uri(&dir);
    let key = Store::generate_raw_key(None).unwrap();
    let provision = |recreate: bool| {
        Store::provision(
            &uri,
            StoreKeyMethod::RawKey,
            PassKey::from(key.as_str()),
            Some("main"),
            recreate,
        )
        .unwrap()
    };

    let store = provision(false);
    put(&store, None, "n", b"v");
    store.close().unwrap();

    let store = provision(false);
    assert_eq!(get(&store, None, "n"), Some(b"v".to_vec()));
    store.close().unwrap();

    let store = provision(true);
    assert_eq!(get(&store, None, "n"), None);
    store.close().unwrap();

    assert!(Store::remove(&uri).unwrap());
    assert!(!Store::remove(&uri).unwrap());
}

#[test]
fn stored_data_contains_no_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let uri = duckdb_uri(&dir);
    let store = Store::provision(&uri, cheap_kdf(), PassKey::from("pw"), None, false).unwrap();
    let mut txn = store.transaction(None).unwrap();
    txn.insert(
        "plaintext-category-marker",
        "plaintext-name-marker",
        b"plaintext-value-marker",
        &[strongbox_vault::EntryTag::parse("tag-name-marker", "tag-value-marker")],
    )
    .unwrap();
    txn.commit().unwrap();
    drop(txn);
    store.close().unwrap();

    let mut bytes = std::fs::read(dir.path().join("store.db")).unwrap();
    if let Ok(wal) = std::fs::read(dir.path().join("store.db.wal")) {
        bytes.extend_from_slice(&wal);
    }
    let text = String::from_utf8_lossy(&bytes);
    for marker in ["category-marker", "name-marker", "value-marker", "tag-value-marker"] {
        assert!(!text.contains(&format!("plaintext-{marker}")), "{marker} leaked");
    }
    assert!(!text.contains("tag-name-marker"));
}

// ── Profiles ──

#[test]
fn profiles_have_separate_namespaces() {
    for store in stores() {
        let other = store.create_profile(Some("other")).unwrap();
        assert_eq!(other, "other");
        let generated = store.create_profile(None).unwrap();
        assert!(!generated.is_empty());

        let mut profiles = store.list_profiles().unwrap();
        profiles.sort();
        let mut expected = vec!["default".to_string(), "other".to_string(), generated];
        expected.sort();
        assert_eq!(profiles, expected);

        put(&store, Some("other"), "n", b"in other");
        assert_eq!(get(&store, None, "n"), None);
        assert_eq!(get(&store, Some("other"), "n"), Some(b"in other".to_vec()));

        let err = store.create_profile(Some("other")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        let err = store.session(Some("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[test]
fn removing_a_profile_drops_its_entries() {
    for store in stores() {
        store.create_profile(Some("temp")).unwrap();
        put(&store, Some("temp"), "n", b"v");
        assert!(store.remove_profile("temp").unwrap());
        assert!(!store.remove_profile("temp").unwrap());
        assert_eq!(
            store.session(Some("temp")).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        store.create_profile(Some("temp")).unwrap();
        assert_eq!(get(&store, Some("temp"), "n"), None);

        let err = store.remove_profile("default").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }
}

#[test]
fn transaction_on_removed_profile_conflicts() {
    for store in stores() {
        store.create_profile(Some("temp")).unwrap();
        let mut txn = store.transaction(Some("temp")).unwrap();
        txn.insert("c", "n", b"v", &[]).unwrap();
        store.remove_profile("temp").unwrap();
        assert!(txn.commit().unwrap_err().is_retryable());
    }
}

#[test]
fn default_profile_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let uri = duckdb_uri(&dir);
    let store = Store::provision(&uri, cheap_kdf(), PassKey::from("pw"), Some("first"), false)
        .unwrap();
    assert_eq!(store.get_default_profile().unwrap(), "first");
    store.create_profile(Some("second")).unwrap();
    put(&store, Some("second"), "n", b"v");
    store.set_default_profile("second").unwrap();
    assert_eq!(
        store.set_default_profile("missing").unwrap_err().kind(),
        ErrorKind::NotFound
    );
    store.close().unwrap();

    let store = Store::open(&uri, None, PassKey::from("pw"), None).unwrap();
    assert_eq!(store.profile_name(), "second");
    assert_eq!(get(&store, None, "n"), Some(b"v".to_vec()));
    store.close().unwrap();

    let first = Store::open(&uri, None, PassKey::from("pw"), Some("first")).unwrap();
    assert_eq!(first.profile_name(), "first");
    assert_eq!(get(&first, None, "n"), None);
}

// ── Rekey & Close ──

#[test]
fn rekey_keeps_entries_and_changes_the_key() {
    let dir = tempfile::tempdir().unwrap();
    let uri = duckdb_uri(&dir);
    let store = Store::provision(&uri, cheap_kdf(), PassKey::from("old"), None, false).unwrap();
    store.create_profile(Some("second")).unwrap();
    put(&store, None, "a", b"1");
    put(&store, Some("second"), "b", b"2");

    let raw = Store::generate_raw_key(None).unwrap();
    store
        .rekey(StoreKeyMethod::RawKey, PassKey::from(raw.as_str()))
        .unwrap();
    assert_eq!(store.key_method().unwrap(), StoreKeyMethod::RawKey);
    assert_eq!(get(&store, None, "a"), Some(b"1".to_vec()));
    store.close().unwrap();

    let err = Store::open(&uri, None, PassKey::from("old"), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);

    let store = Store::open(&uri, None, PassKey::from(raw), None).unwrap();
    assert_eq!(get(&store, None, "a"), Some(b"1".to_vec()));
    assert_eq!(get(&store, Some("second"), "b"), Some(b"2".to_vec()));

    store.rekey(cheap_kdf(), PassKey::from("new")).unwrap();
    store.close().unwrap();
    assert_eq!(
        Store::open(&uri, None, PassKey::from("old"), None).unwrap_err().kind(),
        ErrorKind::Authentication
    );
    let store = Store::open(&uri, None, PassKey::from("new"), None).unwrap();
    assert_eq!(get(&store, Some("second"), "b"), Some(b"2".to_vec()));
}

#[test]
fn closed_store_rejects_everything() {
    for uri in BACKENDS {
        let store = raw_store(uri);
        let clone = store.clone();
        let session = store.session(None).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        let closed = |err: VaultError| {
            assert_eq!(err.kind(), ErrorKind::Input);
            assert!(err.to_string().contains("store is closed"), "{err}");
        };
        closed(clone.session(None).unwrap_err());
        closed(store.transaction(None).unwrap_err());
        closed(store.list_profiles().unwrap_err());
        closed(store.create_profile(None).unwrap_err());
        closed(session.count(None, None).unwrap_err());
    }
}

#[test]
fn scan_without_session() {
    for store in stores() {
        for name in ["a", "b", "c"] {
            put(&store, None, name, name.as_bytes());
        }
        let page = store.scan(None, Some("c"), None, Some(1), Some(5)).unwrap();
        let names: Vec<String> = page.iter().map(|e| e.unwrap().name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
