//! X25519 + XSalsa20-Poly1305 boxes, authenticated and sealed.
//!
//! Both are wire-compatible with libsodium's `crypto_box_easy` and
//! `crypto_box_seal`. Ed25519 keys are accepted and converted to X25519.
//! A sealed box hides the sender: the recipient learns nothing about who
//! produced it.

use crate::alg::KeyAlg;
use crate::ecdh::agreement_key;
use crate::error::{CryptoError, CryptoResult};
use crate::kms::Key;
use ::crypto_box::aead::Aead;
use ::crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// XSalsa20 nonce length.
pub const CBOX_NONCE_SIZE: usize = 24;

/// Overhead of a sealed box: ephemeral public key plus Poly1305 tag.
pub const SEAL_OVERHEAD: usize = 32 + 16;

fn box_public(key: &Key) -> CryptoResult<PublicKey> {
    let key = x25519_key(key)?;
    let bytes: [u8; 32] = key
        .to_public_bytes()?
        .try_into()
        .map_err(|_| CryptoError::Input("invalid x25519 public key".into()))?;
    Ok(PublicKey::from(bytes))
}

fn box_secret(key: &Key) -> CryptoResult<SecretKey> {
    let key = x25519_key(key)?;
    let secret = key.to_secret_bytes()?;
    let bytes: [u8; 32] = secret[..]
        .try_into()
        .map_err(|_| CryptoError::Input("invalid x25519 secret key".into()))?;
    Ok(SecretKey::from(bytes))
}

fn x25519_key(key: &Key) -> CryptoResult<Key> {
    let key = agreement_key(key)?;
    if key.algorithm() != KeyAlg::X25519 {
        return Err(CryptoError::Unsupported(format!(
            "crypto_box requires x25519 or ed25519 keys, got {}",
            key.algorithm()
        )));
    }
    Ok(key)
}

fn box_nonce(nonce: &[u8]) -> CryptoResult<&Nonce> {
    if nonce.len() != CBOX_NONCE_SIZE {
        return Err(CryptoError::Input(format!(
            "crypto_box nonce must be {CBOX_NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }
    Ok(Nonce::from_slice(nonce))
}

/// Generates a random 24-byte box nonce.
pub fn crypto_box_random_nonce() -> [u8; CBOX_NONCE_SIZE] {
    let mut nonce = [0u8; CBOX_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts `message` from `sender` (secret) to `recipient` (public).
pub fn crypto_box(recipient: &Key, sender: &Key, message: &[u8], nonce: &[u8]) -> CryptoResult<Vec<u8>> {
    let salsa_box = SalsaBox::new(&box_public(recipient)?, &box_secret(sender)?);
    salsa_box
        .encrypt(box_nonce(nonce)?, message)
        .map_err(|e| CryptoError::Encryption(format!("crypto_box failed: {e}")))
}

/// Opens a box addressed to `recipient` (secret) from `sender` (public).
pub fn crypto_box_open(
    recipient: &Key,
    sender: &Key,
    ciphertext: &[u8],
    nonce: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let salsa_box = SalsaBox::new(&box_public(sender)?, &box_secret(recipient)?);
    salsa_box
        .decrypt(box_nonce(nonce)?, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decryption("crypto_box open failed (wrong key or tampered data)".into()))
}

/// Anonymously encrypts `message` to `recipient`.
///
/// A fresh ephemeral key pair is generated per call; the nonce is derived
/// from the ephemeral and recipient public keys.
pub fn seal(recipient: &Key, message: &[u8]) -> CryptoResult<Vec<u8>> {
    box_public(recipient)?
        .seal(&mut OsRng, message)
        .map_err(|e| CryptoError::Encryption(format!("sealed box failed: {e}")))
}

/// Opens a sealed box with the recipient's key pair.
pub fn open_seal(recipient: &Key, ciphertext: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < SEAL_OVERHEAD {
        return Err(CryptoError::Decryption("sealed box too short".into()));
    }
    box_secret(recipient)?
        .unseal(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decryption("sealed box open failed (wrong key or tampered data)".into()))
}

pub use self::{open_seal as crypto_box_seal_open, seal as crypto_box_seal};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_box_round_trip() {
        let alice = Key::generate(KeyAlg::X25519).unwrap();
        let bob = Key::generate(KeyAlg::X25519).unwrap();
        let nonce = crypto_box_random_nonce();
        let ct = crypto_box(&bob.to_public_key().unwrap(), &alice, b"hi bob", &nonce).unwrap();
        let pt = crypto_box_open(&bob, &alice.to_public_key().unwrap(), &ct, &nonce).unwrap();
        assert_eq!(&pt[..], b"hi bob");
    }

    #[test]
    fn seal_round_trip_with_ed25519_recipient() {
        let recipient = Key::generate(KeyAlg::Ed25519).unwrap();
        let sealed = seal(&recipient.to_public_key().unwrap(), b"anonymous").unwrap();
        assert_eq!(sealed.len(), b"anonymous".len() + SEAL_OVERHEAD);
        assert_eq!(&open_seal(&recipient, &sealed).unwrap()[..], b"anonymous");
    }

    #[test]
    fn seal_is_randomized() {
        let recipient = Key::generate(KeyAlg::X25519).unwrap();
        assert_ne!(seal(&recipient, b"m").unwrap(), seal(&recipient, b"m").unwrap());
    }

    #[test]
    fn seal_wrong_recipient_fails() {
        let recipient = Key::generate(KeyAlg::X25519).unwrap();
        let other = Key::generate(KeyAlg::X25519).unwrap();
        let sealed = seal(&recipient, b"m").unwrap();
        assert!(matches!(open_seal(&other, &sealed), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn bad_nonce_length() {
        let k = Key::generate(KeyAlg::X25519).unwrap();
        assert!(matches!(crypto_box(&k, &k, b"m", &[0u8; 12]), Err(CryptoError::Input(_))));
    }

    #[test]
    fn k256_is_unsupported() {
        let k = Key::generate(KeyAlg::K256).unwrap();
        assert!(matches!(seal(&k, b"m"), Err(CryptoError::Unsupported(_))));
    }
}
