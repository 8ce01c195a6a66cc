//! Argon2 derivation against known vectors and parameter validation.

use strongbox_crypto::kdf::{PARAMS_INTERACTIVE, derive_key, derive_password_into};
use strongbox_crypto::{
    Argon2, Argon2Algorithm, Argon2Level, Argon2Params, Argon2Version, CryptoError, KdfConfig,
    Salt,
};
use zeroize::Zeroizing;

const PASSWORD: &[u8] = b"my password";
const SALT: &[u8] = b"long enough salt";

// ── Known Vectors ──

#[test]
fn interactive_preset_vector() {
    let key = Argon2::derive_password(Argon2Level::Interactive, PASSWORD, SALT).unwrap();
    assert_eq!(
        hex::encode(&key[..]),
        "9ef87bcf828c46c0136a0d1d9e391d713f75b327c6dc190455bd36c1bae33259"
    );
}

#[test]
fn explicit_argon2id_v10_vector() {
    let params = Argon2Params::from_codes(2, 16, 2, 32768, 2).unwrap();
    let key = Argon2::derive_password(params, PASSWORD, SALT).unwrap();
    assert_eq!(
        hex::encode(&key[..]),
        "5060385221f423e0d5947cffe16c206ce7dbc8ecd07ceeb1f1c2489e53ef8bc4"
    );
}

#[test]
fn explicit_argon2id_v13_vector() {
    let params = Argon2Params {
        alg: Argon2Algorithm::Argon2id,
        version: Argon2Version::V0x13,
        parallelism: 4,
        mem_cost: 65536,
        time_cost: 8,
    };
    let salt = b"13622169116451511306218218219151372412051474242757211221731116372255771137912226";
    let key = Argon2::derive_password(params, b"000000", salt).unwrap();
    assert_eq!(
        hex::encode(&key[..]),
        "1128133bb2b55a35c801f1dfc99a525cb8ff27a519bcd035f1a07f9a1cf6eae9"
    );
}

#[test]
fn preset_and_equivalent_explicit_agree() {
    let preset = Argon2::derive_password(KdfConfig::Preset(Argon2Level::Interactive), PASSWORD, SALT)
        .unwrap();
    let explicit = Argon2::derive_password(KdfConfig::Explicit(PARAMS_INTERACTIVE), PASSWORD, SALT)
        .unwrap();
    assert_eq!(preset, explicit);
}

#[test]
fn version_changes_output() {
    let v13 = Argon2Params::from_codes(2, 19, 2, 32768, 2).unwrap();
    let v10 = Argon2Params::from_codes(2, 16, 2, 32768, 2).unwrap();
    assert_ne!(
        Argon2::derive_password(v13, PASSWORD, SALT).unwrap(),
        Argon2::derive_password(v10, PASSWORD, SALT).unwrap()
    );
}

// ── Validation ──

#[test]
fn unknown_codes_are_input_errors() {
    assert!(matches!(Argon2Params::from_codes(3, 19, 1, 64, 1), Err(CryptoError::Input(_))));
    assert!(matches!(Argon2Params::from_codes(2, 17, 1, 64, 1), Err(CryptoError::Input(_))));
    assert!(matches!(Argon2Level::from_code(2), Err(CryptoError::Input(_))));
}

#[test]
fn zero_costs_are_input_errors() {
    assert!(Argon2Params::from_codes(2, 19, 0, 64, 1).is_err());
    assert!(Argon2Params::from_codes(2, 19, 1, 0, 1).is_err());
    assert!(Argon2Params::from_codes(2, 19, 1, 64, 0).is_err());
    assert!(Argon2Params::from_codes(2, 19, 1, 64, -4).is_err());

    let params = Argon2Params {
        alg: Argon2Algorithm::Argon2id,
        version: Argon2Version::V0x13,
        parallelism: 1,
        mem_cost: 64,
        time_cost: 0,
    };
    let err = Argon2::derive_password(params, PASSWORD, SALT).unwrap_err();
    assert!(matches!(err, CryptoError::Input(_)));
}

#[test]
fn memory_below_argon2_minimum_rejected() {
    // Argon2 needs at least 8 KiB per lane.
    let params = Argon2Params::from_codes(2, 19, 4, 8, 1).unwrap();
    let err = Argon2::derive_password(params, PASSWORD, SALT).unwrap_err();
    assert!(matches!(err, CryptoError::Input(_)));
}

#[test]
fn short_salt_rejected() {
    let mut out = [0u8; 32];
    let err = derive_password_into(&KdfConfig::default(), PASSWORD, b"1234567", &mut out)
        .unwrap_err();
    match err {
        CryptoError::Input(msg) => assert!(msg.contains("salt"), "got: {msg}"),
        other => panic!("expected CryptoError::Input, got: {other:?}"),
    }
}

#[test]
fn derive_key_consumes_password() {
    let cheap = Argon2Params::from_codes(2, 19, 1, 64, 1).unwrap();
    let salt = Salt::random();
    let a = derive_key(&cheap.into(), Zeroizing::new(b"pw".to_vec()), &salt).unwrap();
    let b = derive_key(&cheap.into(), Zeroizing::new(b"pw".to_vec()), &salt).unwrap();
    assert_eq!(a, b);
}
