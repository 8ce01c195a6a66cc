//! Cryptographic layer for Strongbox.
//!
//! Provides:
//! - Argon2 password-based key derivation with preset or explicit parameters
//! - Key management for Ed25519, X25519, secp256k1, P-256 and (X)ChaCha20-Poly1305 keys
//! - ECDH, ECDH-ES key derivation, and libsodium-compatible boxes
//! - Value encryption and deterministic searchable encryption
//!
//! # Architecture
//!
//! A store is protected by a two-tier key system:
//!
//! 1. **Master Key**: Derived from a password with Argon2, or supplied raw.
//!    It is never stored; it only wraps profile keys and a verification record.
//!
//! 2. **Profile Key**: A random key per profile, wrapped by the master key.
//!    Independent sub-keys for categories, names, tags and values are derived
//!    from it with HKDF.
//!
//! Rekeying a store therefore re-wraps profile keys and leaves entry records
//! untouched.

mod alg;
mod cipher;
pub mod crypto_box;
pub mod ecdh;
pub mod engine;
mod error;
mod jwk;
pub mod kdf;
mod key;
mod kms;
mod wrap;

pub use alg::KeyAlg;
pub use cipher::{NONCE_SIZE, TAG_SIZE};
pub use engine::{
    EncryptedValue, decrypt_searchable, decrypt_value, encrypt_searchable, encrypt_value,
};
pub use error::{CryptoError, CryptoResult};
pub use jwk::Jwk;
pub use kdf::{Argon2, Argon2Algorithm, Argon2Level, Argon2Params, Argon2Version, KdfConfig};
pub use key::{
    DerivedKey, KEY_SIZE, SALT_SIZE, Salt, generate_random_key, random_bytes,
};
pub use kms::{Key, SIGNATURE_SIZE};
pub use wrap::WrappedKey;
