//! Value and searchable-field encryption.
//!
//! Values use ChaCha20-Poly1305 with a random nonce per write, so equal
//! plaintexts never produce equal ciphertexts.
//!
//! Searchable fields (categories, names, tag names and values) are encrypted
//! deterministically: the nonce is an HMAC of the plaintext, so equal
//! plaintexts under the same keys give equal ciphertexts and can be matched
//! without decryption. This leaks equality between fields encrypted under the
//! same key and nothing else; it is strictly weaker than value encryption.

use crate::cipher::{NONCE_SIZE, TAG_SIZE, cipher_for, random_nonce};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{Nonce, Tag};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// An encrypted entry value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedValue {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl EncryptedValue {
    /// Serialized form: `nonce | ciphertext | tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len() + TAG_SIZE);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "encrypted value too short: {} bytes",
                bytes.len()
            )));
        }
        let (nonce, rest) = bytes.split_at(NONCE_SIZE);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);
        let mut value = EncryptedValue {
            nonce: [0u8; NONCE_SIZE],
            ciphertext: ciphertext.to_vec(),
            tag: [0u8; TAG_SIZE],
        };
        value.nonce.copy_from_slice(nonce);
        value.tag.copy_from_slice(tag);
        Ok(value)
    }
}

/// Encrypts a value under a fresh random nonce, authenticating `aad`.
pub fn encrypt_value(key: &DerivedKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<EncryptedValue> {
    let nonce = random_nonce();
    let mut ciphertext = plaintext.to_vec();
    let tag = cipher_for(key)
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut ciphertext)
        .map_err(|e| CryptoError::Encryption(format!("value encryption: {e}")))?;
    let mut value = EncryptedValue {
        nonce,
        ciphertext,
        tag: [0u8; TAG_SIZE],
    };
    value.tag.copy_from_slice(&tag);
    Ok(value)
}

/// Decrypts a value. A wrong key, wrong `aad` or any bit flip fails.
pub fn decrypt_value(
    key: &DerivedKey,
    value: &EncryptedValue,
    aad: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let mut plaintext = Zeroizing::new(value.ciphertext.clone());
    cipher_for(key)
        .decrypt_in_place_detached(
            Nonce::from_slice(&value.nonce),
            aad,
            &mut plaintext,
            Tag::from_slice(&value.tag),
        )
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))?;
    Ok(plaintext)
}

fn synthetic_nonce(hmac_key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<[u8; NONCE_SIZE]> {
    let mut mac = HmacSha256::new_from_slice(hmac_key.as_bytes())
        .map_err(|e| CryptoError::KeyDerivation(format!("hmac key: {e}")))?;
    mac.update(plaintext);
    let digest = mac.finalize().into_bytes();
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&digest[..NONCE_SIZE]);
    Ok(nonce)
}

/// Deterministically encrypts a searchable field.
///
/// Output is `nonce | ciphertext | tag` where `nonce = HMAC(hmac_key, plaintext)[..12]`.
pub fn encrypt_searchable(
    field_key: &DerivedKey,
    hmac_key: &DerivedKey,
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let nonce = synthetic_nonce(hmac_key, plaintext)?;
    let mut buffer = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
    buffer.extend_from_slice(&nonce);
    buffer.extend_from_slice(plaintext);
    let tag = cipher_for(field_key)
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), &[], &mut buffer[NONCE_SIZE..])
        .map_err(|e| CryptoError::Encryption(format!("searchable encryption: {e}")))?;
    buffer.extend_from_slice(&tag);
    Ok(buffer)
}

/// Inverse of [`encrypt_searchable`].
pub fn decrypt_searchable(field_key: &DerivedKey, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    let value = EncryptedValue::from_bytes(ciphertext)?;
    decrypt_value(field_key, &value, &[]).map(|plaintext| plaintext.to_vec())
}
