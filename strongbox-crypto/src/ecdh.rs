//! Elliptic-curve key agreement and ECDH-ES key derivation.

use crate::alg::KeyAlg;
use crate::error::{CryptoError, CryptoResult};
use crate::kms::{Key, KeyMaterial};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Normalizes a key for agreement: Ed25519 keys become X25519.
pub(crate) fn agreement_key(key: &Key) -> CryptoResult<Key> {
    match key.algorithm() {
        KeyAlg::Ed25519 => key.convert_key(KeyAlg::X25519),
        KeyAlg::X25519 | KeyAlg::K256 | KeyAlg::P256 => Ok(key.clone()),
        other => Err(CryptoError::Unsupported(format!(
            "{other} keys cannot be used for key agreement"
        ))),
    }
}

/// Computes the raw ECDH shared secret between a secret key and a peer's public key.
pub fn derive_shared_secret(private_key: &Key, peer_public_key: &Key) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let private_key = agreement_key(private_key)?;
    let peer_public_key = agreement_key(peer_public_key)?;
    if private_key.algorithm() != peer_public_key.algorithm() {
        return Err(CryptoError::Input(format!(
            "key agreement between {} and {}",
            private_key.algorithm(),
            peer_public_key.algorithm()
        )));
    }
    match (&private_key.material, &peer_public_key.material) {
        (
            KeyMaterial::X25519 {
                secret: Some(secret),
                ..
            },
            KeyMaterial::X25519 { public, .. },
        ) => {
            let shared = secret.diffie_hellman(public);
            if !shared.was_contributory() {
                return Err(CryptoError::Input("peer public key is a low-order point".into()));
            }
            Ok(Zeroizing::new(shared.as_bytes().to_vec()))
        }
        (
            KeyMaterial::K256 {
                secret: Some(secret),
                ..
            },
            KeyMaterial::K256 { public, .. },
        ) => {
            let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
        (
            KeyMaterial::P256 {
                secret: Some(secret),
                ..
            },
            KeyMaterial::P256 { public, .. },
        ) => {
            let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
        _ => Err(CryptoError::Unsupported(format!(
            "{} key has no secret part for key agreement",
            private_key.algorithm()
        ))),
    }
}

fn length_prefixed(hasher: &mut Sha256, data: &[u8]) {
    hasher.update((data.len() as u32).to_be_bytes());
    hasher.update(data);
}

/// Concat KDF (NIST SP 800-56A, single-step, SHA-256) as used by JWA ECDH-ES.
pub fn concat_kdf(
    z: &[u8],
    alg_id: &[u8],
    apu: &[u8],
    apv: &[u8],
    output_len: usize,
) -> Zeroizing<Vec<u8>> {
    let mut output = Zeroizing::new(Vec::with_capacity(output_len + 32));
    let mut counter: u32 = 1;
    while output.len() < output_len {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        length_prefixed(&mut hasher, alg_id);
        length_prefixed(&mut hasher, apu);
        length_prefixed(&mut hasher, apv);
        hasher.update(((output_len * 8) as u32).to_be_bytes());
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    output.truncate(output_len);
    output
}

/// Derives a content-encryption key of algorithm `alg` from an ephemeral
/// secret key and a recipient public key (or the reverse on receipt).
pub fn ecdh_es_derive_key(
    alg: KeyAlg,
    ephemeral: &Key,
    recipient: &Key,
    apu: &[u8],
    apv: &[u8],
) -> CryptoResult<Key> {
    if !alg.is_symmetric() {
        return Err(CryptoError::Input(format!(
            "ECDH-ES derives symmetric keys, not {alg}"
        )));
    }
    let z = if ephemeral.has_secret() {
        derive_shared_secret(ephemeral, recipient)?
    } else {
        derive_shared_secret(recipient, ephemeral)?
    };
    let alg_id = alg.as_str().to_ascii_uppercase();
    let cek = concat_kdf(&z, alg_id.as_bytes(), apu, apv, alg.secret_len());
    Key::from_secret_bytes(alg, &cek)
}
