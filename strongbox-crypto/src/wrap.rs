//! Self-describing wrapped keys.
//!
//! Layout:
//!
//! ```text
//! "SBWK" | version (1) | wrapping alg (1) | key alg (1) | part (1) | nonce | ciphertext+tag
//! ```
//!
//! Everything before the nonce is authenticated as AAD, so neither the
//! algorithm nor the secret/public marker can be altered without unwrap
//! failing.

use crate::alg::KeyAlg;
use crate::error::{CryptoError, CryptoResult};
use crate::kms::Key;

const MAGIC: &[u8; 4] = b"SBWK";
const VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 4;

const PART_SECRET: u8 = 0;
const PART_PUBLIC: u8 = 1;

/// A key encrypted under another (symmetric) key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedKey {
    bytes: Vec<u8>,
}

impl WrappedKey {
    /// Parses and validates the header of a serialized wrapped key.
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(CryptoError::Input("not a wrapped key".into()));
        }
        if bytes[4] != VERSION {
            return Err(CryptoError::Unsupported(format!(
                "wrapped key version {}",
                bytes[4]
            )));
        }
        let wrap_alg = KeyAlg::from_code(bytes[5])?;
        KeyAlg::from_code(bytes[6])?;
        if bytes[7] > PART_PUBLIC {
            return Err(CryptoError::Input("invalid wrapped key part marker".into()));
        }
        let nonce_len = wrap_alg
            .nonce_len()
            .ok_or_else(|| CryptoError::Input("wrapping algorithm is not symmetric".into()))?;
        if bytes.len() < HEADER_LEN + nonce_len + crate::cipher::TAG_SIZE {
            return Err(CryptoError::Input("wrapped key truncated".into()));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Algorithm of the wrapped key, readable without unwrapping.
    pub fn algorithm(&self) -> CryptoResult<KeyAlg> {
        KeyAlg::from_code(self.bytes[6])
    }

    fn wrapping_algorithm(&self) -> CryptoResult<KeyAlg> {
        KeyAlg::from_code(self.bytes[5])
    }

    fn is_public(&self) -> bool {
        self.bytes[7] == PART_PUBLIC
    }
}

impl Key {
    /// Encrypts `key` under this symmetric key.
    pub fn wrap_key(&self, key: &Key) -> CryptoResult<WrappedKey> {
        let (wrap_alg, _) = self.symmetric_key()?;
        let (part, material) = if key.has_secret() {
            (PART_SECRET, key.to_secret_bytes()?)
        } else {
            (PART_PUBLIC, zeroize::Zeroizing::new(key.to_public_bytes()?))
        };
        let mut bytes = Vec::with_capacity(HEADER_LEN + 24 + material.len() + 16);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[VERSION, wrap_alg.code(), key.algorithm().code(), part]);
        let nonce = self.aead_random_nonce()?;
        let ciphertext = self.aead_encrypt(&material, &nonce, &bytes)?;
        bytes.extend_from_slice(&nonce);
        bytes.extend_from_slice(&ciphertext);
        Ok(WrappedKey { bytes })
    }

    /// Decrypts a [`WrappedKey`]. A wrong wrapping key or any modification
    /// fails with a decryption error.
    pub fn unwrap_key(&self, wrapped: &WrappedKey) -> CryptoResult<Key> {
        let (wrap_alg, _) = self.symmetric_key()?;
        if wrapped.wrapping_algorithm()? != wrap_alg {
            return Err(CryptoError::Decryption(format!(
                "key was wrapped with {}, not {wrap_alg}",
                wrapped.wrapping_algorithm()?
            )));
        }
        let nonce_len = wrap_alg.nonce_len().unwrap_or(12);
        let (header, rest) = wrapped.bytes.split_at(HEADER_LEN);
        let (nonce, ciphertext) = rest.split_at(nonce_len);
        let material = self.aead_decrypt(ciphertext, nonce, header)?;
        let alg = wrapped.algorithm()?;
        if wrapped.is_public() {
            Key::from_public_bytes(alg, &material)
        } else {
            Key::from_secret_bytes(alg, &material)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_every_alg() {
        let kek = Key::generate(KeyAlg::XC20P).unwrap();
        for alg in [
            KeyAlg::Ed25519,
            KeyAlg::X25519,
            KeyAlg::K256,
            KeyAlg::P256,
            KeyAlg::C20P,
            KeyAlg::XC20P,
        ] {
            let key = Key::generate(alg).unwrap();
            let wrapped = kek.wrap_key(&key).unwrap();
            assert_eq!(wrapped.algorithm().unwrap(), alg);
            assert_eq!(kek.unwrap_key(&wrapped).unwrap(), key);
        }
    }

    #[test]
    fn public_keys_wrap_as_public() {
        let kek = Key::generate(KeyAlg::C20P).unwrap();
        let public = Key::generate(KeyAlg::Ed25519).unwrap().to_public_key().unwrap();
        let back = kek.unwrap_key(&kek.wrap_key(&public).unwrap()).unwrap();
        assert!(!back.has_secret());
        assert_eq!(back, public);
    }

    #[test]
    fn header_tamper_fails_authentication() {
        let kek = Key::generate(KeyAlg::C20P).unwrap();
        let key = Key::generate(KeyAlg::X25519).unwrap();
        let mut bytes = kek.wrap_key(&key).unwrap().into_bytes();
        bytes[6] = KeyAlg::Ed25519.code();
        let wrapped = WrappedKey::from_bytes(bytes).unwrap();
        assert!(matches!(kek.unwrap_key(&wrapped), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn wrong_kek_fails() {
        let kek = Key::generate(KeyAlg::C20P).unwrap();
        let other = Key::generate(KeyAlg::C20P).unwrap();
        let wrapped = kek.wrap_key(&Key::generate(KeyAlg::C20P).unwrap()).unwrap();
        assert!(matches!(other.unwrap_key(&wrapped), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(WrappedKey::from_bytes(b"nope".to_vec()).is_err());
        assert!(WrappedKey::from_bytes(b"SBWK\x01\x10\x01\x00".to_vec()).is_err());
    }

    #[test]
    fn asymmetric_kek_is_unsupported() {
        let kek = Key::generate(KeyAlg::Ed25519).unwrap();
        let key = Key::generate(KeyAlg::C20P).unwrap();
        assert!(matches!(kek.wrap_key(&key), Err(CryptoError::Unsupported(_))));
    }
}
