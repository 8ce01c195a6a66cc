//! Key generation, import/export, signatures, JWK and wrapping.

use strongbox_crypto::{CryptoError, Key, KeyAlg, SIGNATURE_SIZE, WrappedKey};

const ALL: [KeyAlg; 6] = [
    KeyAlg::Ed25519,
    KeyAlg::X25519,
    KeyAlg::K256,
    KeyAlg::P256,
    KeyAlg::C20P,
    KeyAlg::XC20P,
];

// ── Import / Export ──

#[test]
fn secret_bytes_round_trip() {
    for alg in ALL {
        let key = Key::generate(alg).unwrap();
        let secret = key.to_secret_bytes().unwrap();
        let again = Key::from_secret_bytes(alg, &secret).unwrap();
        assert_eq!(again, key, "{alg}");
    }
}

#[test]
fn public_only_key_has_no_secret() {
    let key = Key::generate(KeyAlg::Ed25519).unwrap();
    let public = Key::from_public_bytes(KeyAlg::Ed25519, &key.to_public_bytes().unwrap()).unwrap();
    assert!(!public.has_secret());
    match public.to_secret_bytes() {
        Err(CryptoError::Unsupported(_)) => {}
        other => panic!("expected Unsupported, got {other:?}"),
    }
}

#[test]
fn wrong_secret_length_is_input_error() {
    assert!(matches!(
        Key::from_secret_bytes(KeyAlg::Ed25519, &[0u8; 31]),
        Err(CryptoError::Input(_))
    ));
    assert!(matches!(
        Key::from_secret_bytes(KeyAlg::C20P, &[0u8; 33]),
        Err(CryptoError::Input(_))
    ));
}

#[test]
fn zero_ec_scalar_rejected() {
    assert!(Key::from_secret_bytes(KeyAlg::K256, &[0u8; 32]).is_err());
    assert!(Key::from_secret_bytes(KeyAlg::P256, &[0u8; 32]).is_err());
}

#[test]
fn k256_accepts_uncompressed_public() {
    let key = Key::generate(KeyAlg::K256).unwrap();
    let jwk = key.to_jwk().unwrap();
    let imported = Key::from_jwk(&serde_json::to_string(&jwk).unwrap()).unwrap();
    assert_eq!(imported.to_public_bytes().unwrap(), key.to_public_bytes().unwrap());
}

// ── Signatures ──

#[test]
fn sign_and_verify() {
    for alg in [KeyAlg::Ed25519, KeyAlg::K256, KeyAlg::P256] {
        let key = Key::generate(alg).unwrap();
        let sig = key.sign(b"message").unwrap();
        assert_eq!(sig.len(), SIGNATURE_SIZE);
        let public = key.to_public_key().unwrap();
        assert!(public.verify(b"message", &sig).unwrap(), "{alg}");
        assert!(!public.verify(b"other message", &sig).unwrap(), "{alg}");
    }
}

#[test]
fn malformed_signature_verifies_false() {
    let key = Key::generate(KeyAlg::Ed25519).unwrap();
    assert!(!key.verify(b"message", b"short").unwrap());
    let mut sig = key.sign(b"message").unwrap();
    sig[0] ^= 0x01;
    assert!(!key.verify(b"message", &sig).unwrap());
}

#[test]
fn non_signing_keys_are_unsupported() {
    for alg in [KeyAlg::X25519, KeyAlg::C20P, KeyAlg::XC20P] {
        let key = Key::generate(alg).unwrap();
        assert!(matches!(key.sign(b"m"), Err(CryptoError::Unsupported(_))), "{alg}");
        assert!(matches!(key.verify(b"m", &[0u8; 64]), Err(CryptoError::Unsupported(_))));
    }
}

#[test]
fn p256_and_k256_signatures_do_not_cross() {
    let k = Key::generate(KeyAlg::K256).unwrap();
    let p = Key::from_secret_bytes(KeyAlg::P256, &k.to_secret_bytes().unwrap()).unwrap();
    let sig = p.sign(b"message").unwrap();
    assert!(p.verify(b"message", &sig).unwrap());
    assert!(!k.verify(b"message", &sig).unwrap());
}

#[test]
fn public_key_cannot_sign() {
    let public = Key::generate(KeyAlg::K256).unwrap().to_public_key().unwrap();
    assert!(matches!(public.sign(b"m"), Err(CryptoError::Unsupported(_))));
}

// ── Conversion ──

#[test]
fn ed25519_converts_to_x25519_consistently() {
    let ed = Key::generate(KeyAlg::Ed25519).unwrap();
    let from_secret = ed.convert_key(KeyAlg::X25519).unwrap();
    let from_public = ed.to_public_key().unwrap().convert_key(KeyAlg::X25519).unwrap();
    assert_eq!(
        from_secret.to_public_bytes().unwrap(),
        from_public.to_public_bytes().unwrap()
    );
    assert!(matches!(
        ed.convert_key(KeyAlg::K256),
        Err(CryptoError::Unsupported(_))
    ));
}

// ── JWK ──

#[test]
fn rfc8037_ed25519_thumbprint() {
    let jwk = r#"{"kty":"OKP","crv":"Ed25519","x":"11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"}"#;
    let key = Key::from_jwk(jwk).unwrap();
    assert_eq!(
        key.jwk_thumbprint().unwrap(),
        "kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k"
    );
}

#[test]
fn jwk_with_private_part_imports_secret() {
    let jwk = r#"{"kty":"OKP","crv":"Ed25519",
        "d":"nWGxne_9WmC6hEr0kuwsxERJxWl7MmkZcDusAxyuf2A",
        "x":"11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"}"#;
    let key = Key::from_jwk(jwk).unwrap();
    assert!(key.has_secret());
    let sig = key.sign(b"").unwrap();
    assert!(key.verify(b"", &sig).unwrap());
}

#[test]
fn rfc7515_p256_jwk_imports_and_signs() {
    let jwk = r#"{"kty":"EC","crv":"P-256",
        "x":"f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
        "y":"x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0",
        "d":"jpsQnnGQmL-YBIffH1136cLPwaLrMTUUxvy5pgOTuuw"}"#;
    let key = Key::from_jwk(jwk).unwrap();
    assert_eq!(key.algorithm(), KeyAlg::P256);
    assert!(key.has_secret());

    let public = key.to_public_key().unwrap();
    let exported = public.to_jwk().unwrap();
    assert_eq!(exported.crv, "P-256");
    assert_eq!(exported.x, "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU");
    assert_eq!(exported.y.as_deref(), Some("x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"));
    assert_eq!(key.jwk_thumbprint().unwrap(), public.jwk_thumbprint().unwrap());

    let sig = key.sign(b"payload").unwrap();
    assert!(public.verify(b"payload", &sig).unwrap());
}

// ── Wrapping ──

#[test]
fn wrapped_key_survives_serialization() {
    let kek = Key::generate(KeyAlg::C20P).unwrap();
    for alg in ALL {
        let key = Key::generate(alg).unwrap();
        let bytes = kek.wrap_key(&key).unwrap().into_bytes();
        let wrapped = WrappedKey::from_bytes(bytes).unwrap();
        assert_eq!(kek.unwrap_key(&wrapped).unwrap(), key, "{alg}");
    }
}

#[test]
fn tampered_wrapped_key_fails() {
    let kek = Key::generate(KeyAlg::XC20P).unwrap();
    let mut bytes = kek
        .wrap_key(&Key::generate(KeyAlg::Ed25519).unwrap())
        .unwrap()
        .into_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x80;
    let wrapped = WrappedKey::from_bytes(bytes).unwrap();
    let err = kek.unwrap_key(&wrapped).unwrap_err();
    assert!(err.is_authentication_failure(), "got: {err:?}");
}

#[test]
fn wrapping_with_other_symmetric_alg_fails() {
    let c20p = Key::from_secret_bytes(KeyAlg::C20P, &[7u8; 32]).unwrap();
    let xc20p = Key::from_secret_bytes(KeyAlg::XC20P, &[7u8; 32]).unwrap();
    let wrapped = c20p.wrap_key(&Key::generate(KeyAlg::X25519).unwrap()).unwrap();
    assert!(xc20p.unwrap_key(&wrapped).is_err());
}

// ── AEAD ──

#[test]
fn aead_with_aad() {
    for alg in [KeyAlg::C20P, KeyAlg::XC20P] {
        let key = Key::generate(alg).unwrap();
        let nonce = key.aead_random_nonce().unwrap();
        let ct = key.aead_encrypt(b"payload", &nonce, b"header").unwrap();
        assert_eq!(ct.len(), b"payload".len() + 16);
        assert_eq!(&key.aead_decrypt(&ct, &nonce, b"header").unwrap()[..], b"payload");
        assert!(key.aead_decrypt(&ct, &nonce, b"other").is_err());
    }
}

#[test]
fn asymmetric_aead_is_unsupported() {
    let key = Key::generate(KeyAlg::X25519).unwrap();
    assert!(matches!(
        key.aead_random_nonce(),
        Err(CryptoError::Unsupported(_))
    ));
}
