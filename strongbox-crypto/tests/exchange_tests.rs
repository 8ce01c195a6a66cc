//! ECDH, ECDH-ES and box/sealed-box behaviour.

use strongbox_crypto::crypto_box::{
    CBOX_NONCE_SIZE, crypto_box, crypto_box_open, crypto_box_random_nonce, crypto_box_seal,
    crypto_box_seal_open, open_seal, seal,
};
use strongbox_crypto::ecdh::{concat_kdf, derive_shared_secret, ecdh_es_derive_key};
use strongbox_crypto::{CryptoError, Key, KeyAlg};

// ── Key Agreement ──

#[test]
fn ed25519_keys_agree_via_x25519() {
    let alice = Key::generate(KeyAlg::Ed25519).unwrap();
    let bob = Key::generate(KeyAlg::X25519).unwrap();
    let ab = derive_shared_secret(&alice, &bob.to_public_key().unwrap()).unwrap();
    let ba = derive_shared_secret(&bob, &alice.to_public_key().unwrap()).unwrap();
    assert_eq!(ab, ba);
}

#[test]
fn symmetric_keys_cannot_agree() {
    let a = Key::generate(KeyAlg::C20P).unwrap();
    let b = Key::generate(KeyAlg::X25519).unwrap();
    assert!(matches!(derive_shared_secret(&a, &b), Err(CryptoError::Unsupported(_))));
}

#[test]
fn low_order_point_rejected() {
    let a = Key::generate(KeyAlg::X25519).unwrap();
    let zero = Key::from_public_bytes(KeyAlg::X25519, &[0u8; 32]).unwrap();
    assert!(matches!(derive_shared_secret(&a, &zero), Err(CryptoError::Input(_))));
}

#[test]
fn concat_kdf_binds_party_info() {
    let z = [3u8; 32];
    let base = concat_kdf(&z, b"C20P", b"Alice", b"Bob", 32);
    assert_ne!(base, concat_kdf(&z, b"C20P", b"Mallory", b"Bob", 32));
    assert_ne!(base, concat_kdf(&z, b"C20P", b"Alice", b"Eve", 32));
    assert_ne!(base, concat_kdf(&z, b"XC20P", b"Alice", b"Bob", 32));
    assert_eq!(base, concat_kdf(&z, b"C20P", b"Alice", b"Bob", 32));
}

#[test]
fn ecdh_es_k256_round_trip() {
    let ephemeral = Key::generate(KeyAlg::K256).unwrap();
    let recipient = Key::generate(KeyAlg::K256).unwrap();
    let cek = ecdh_es_derive_key(KeyAlg::C20P, &ephemeral, &recipient.to_public_key().unwrap(), b"", b"")
        .unwrap();
    let nonce = cek.aead_random_nonce().unwrap();
    let ct = cek.aead_encrypt(b"jwe payload", &nonce, b"").unwrap();

    let receiver_cek =
        ecdh_es_derive_key(KeyAlg::C20P, &ephemeral.to_public_key().unwrap(), &recipient, b"", b"")
            .unwrap();
    assert_eq!(&receiver_cek.aead_decrypt(&ct, &nonce, b"").unwrap()[..], b"jwe payload");
}

#[test]
fn ecdh_es_p256_round_trip() {
    let ephemeral = Key::generate(KeyAlg::P256).unwrap();
    let recipient = Key::generate(KeyAlg::P256).unwrap();
    let cek = ecdh_es_derive_key(KeyAlg::XC20P, &ephemeral, &recipient.to_public_key().unwrap(), b"apu", b"apv")
        .unwrap();
    let nonce = cek.aead_random_nonce().unwrap();
    let ct = cek.aead_encrypt(b"jwe payload", &nonce, b"").unwrap();

    let receiver_cek =
        ecdh_es_derive_key(KeyAlg::XC20P, &ephemeral.to_public_key().unwrap(), &recipient, b"apu", b"apv")
            .unwrap();
    assert_eq!(&receiver_cek.aead_decrypt(&ct, &nonce, b"").unwrap()[..], b"jwe payload");
}

#[test]
fn ecdh_es_rejects_asymmetric_target() {
    let a = Key::generate(KeyAlg::X25519).unwrap();
    let b = Key::generate(KeyAlg::X25519).unwrap();
    assert!(matches!(
        ecdh_es_derive_key(KeyAlg::Ed25519, &a, &b, b"", b""),
        Err(CryptoError::Input(_))
    ));
}

// ── Authenticated Box ──

#[test]
fn box_tamper_detected() {
    let sender = Key::generate(KeyAlg::X25519).unwrap();
    let recipient = Key::generate(KeyAlg::X25519).unwrap();
    let nonce = crypto_box_random_nonce();
    assert_eq!(nonce.len(), CBOX_NONCE_SIZE);
    let mut ct = crypto_box(&recipient, &sender, b"payload", &nonce).unwrap();
    ct[0] ^= 0x01;
    let err = crypto_box_open(&recipient, &sender, &ct, &nonce).unwrap_err();
    assert!(err.is_authentication_failure());
}

#[test]
fn box_wrong_sender_fails() {
    let sender = Key::generate(KeyAlg::X25519).unwrap();
    let imposter = Key::generate(KeyAlg::X25519).unwrap();
    let recipient = Key::generate(KeyAlg::X25519).unwrap();
    let nonce = crypto_box_random_nonce();
    let ct = crypto_box(&recipient, &sender, b"payload", &nonce).unwrap();
    assert!(crypto_box_open(&recipient, &imposter, &ct, &nonce).is_err());
}

// ── Sealed Box ──

#[test]
fn seal_aliases_agree() {
    let recipient = Key::generate(KeyAlg::X25519).unwrap();
    let sealed = crypto_box_seal(&recipient, b"hello").unwrap();
    assert_eq!(&open_seal(&recipient, &sealed).unwrap()[..], b"hello");
    let sealed = seal(&recipient, b"hello").unwrap();
    assert_eq!(&crypto_box_seal_open(&recipient, &sealed).unwrap()[..], b"hello");
}

#[test]
fn seal_empty_message() {
    let recipient = Key::generate(KeyAlg::X25519).unwrap();
    let sealed = seal(&recipient, b"").unwrap();
    assert!(open_seal(&recipient, &sealed).unwrap().is_empty());
}

#[test]
fn truncated_seal_fails() {
    let recipient = Key::generate(KeyAlg::X25519).unwrap();
    let sealed = seal(&recipient, b"hello").unwrap();
    for len in [0, 10, 47, sealed.len() - 1] {
        assert!(
            matches!(open_seal(&recipient, &sealed[..len]), Err(CryptoError::Decryption(_))),
            "length {len}"
        );
    }
}

#[test]
fn public_only_recipient_cannot_open() {
    let recipient = Key::generate(KeyAlg::X25519).unwrap();
    let public = recipient.to_public_key().unwrap();
    let sealed = seal(&public, b"hello").unwrap();
    assert!(matches!(open_seal(&public, &sealed), Err(CryptoError::Unsupported(_))));
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn seal_open_always_roundtrips(msg in proptest::collection::vec(any::<u8>(), 0..256)) {
            let recipient = Key::generate(KeyAlg::X25519).unwrap();
            let sealed = seal(&recipient, &msg).unwrap();
            let opened = open_seal(&recipient, &sealed).unwrap();
            prop_assert_eq!(&opened[..], &msg[..]);
        }
    }
}
