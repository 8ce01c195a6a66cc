//! ChaCha20-Poly1305 plumbing shared by the engine and key wrapping.

use crate::key::DerivedKey;
use chacha20poly1305::aead::KeyInit;
use chacha20poly1305::{ChaCha20Poly1305, Key};
use rand::RngCore;
use rand::rngs::OsRng;

/// ChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

pub(crate) fn cipher_for(key: &DerivedKey) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

pub(crate) fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use chacha20poly1305::Nonce;
    use chacha20poly1305::aead::{Aead, Payload};
    use crate::key::generate_random_key;

    #[test]
    fn nonces_are_fresh() {
        assert_ne!(random_nonce(), random_nonce());
    }

    #[test]
    fn tag_is_appended() {
        let key = generate_random_key();
        let nonce = random_nonce();
        let payload = Payload { msg: b"hello", aad: b"record" };
        let ct = cipher_for(&key).encrypt(Nonce::from_slice(&nonce), payload).unwrap();
        assert_eq!(ct.len(), 5 + TAG_SIZE);
    }
}
