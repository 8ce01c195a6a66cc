//! Key management: generation, import/export, signing and symmetric AEAD.
//!
//! A [`Key`] holds the material for one [`KeyAlg`]. Asymmetric keys always
//! carry their public part and optionally the secret part; symmetric keys are
//! secret by definition. Every secret representation used here is zeroized
//! on drop, so a `Key` wipes its material once the last copy goes away.

use crate::alg::KeyAlg;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use ed25519_dalek::{Signer as _, Verifier as _};
use hkdf::Hkdf;
use k256::ecdsa::signature::{Signer as _, Verifier as _};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Ed25519 and ECDSA signatures are both 64 bytes.
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Clone)]
pub(crate) enum KeyMaterial {
    Ed25519 {
        secret: Option<ed25519_dalek::SigningKey>,
        public: ed25519_dalek::VerifyingKey,
    },
    X25519 {
        secret: Option<x25519_dalek::StaticSecret>,
        public: x25519_dalek::PublicKey,
    },
    K256 {
        secret: Option<k256::SecretKey>,
        public: k256::PublicKey,
    },
    P256 {
        secret: Option<p256::SecretKey>,
        public: p256::PublicKey,
    },
    Symmetric {
        alg: KeyAlg,
        key: DerivedKey,
    },
}

/// A cryptographic key of one algorithm.
#[derive(Clone)]
pub struct Key {
    pub(crate) material: KeyMaterial,
}

fn random_secret() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut bytes[..]);
    bytes
}

fn check_len_32(alg: KeyAlg, bytes: &[u8]) -> CryptoResult<()> {
    if bytes.len() != 32 {
        return Err(CryptoError::Input(format!(
            "invalid {alg} key length: expected 32, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

fn exact_32(alg: KeyAlg, bytes: &[u8]) -> CryptoResult<Zeroizing<[u8; 32]>> {
    check_len_32(alg, bytes)?;
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Moves the scalar into the secret, leaving zeros behind in `scalar`.
fn x25519_secret(scalar: &mut Zeroizing<[u8; 32]>) -> x25519_dalek::StaticSecret {
    x25519_dalek::StaticSecret::from(std::mem::take(&mut **scalar))
}

impl Key {
    /// Generates a fresh random key.
    pub fn generate(alg: KeyAlg) -> CryptoResult<Self> {
        match alg {
            KeyAlg::K256 => Ok(Self::k256_from_secret(k256::SecretKey::random(&mut OsRng))),
            KeyAlg::P256 => Ok(Self::p256_from_secret(p256::SecretKey::random(&mut OsRng))),
            _ => Self::from_secret_bytes(alg, &random_secret()[..]),
        }
    }

    /// Deterministically derives a key from at least 32 bytes of seed material.
    pub fn from_seed(alg: KeyAlg, seed: &[u8]) -> CryptoResult<Self> {
        if seed.len() < KEY_SIZE {
            return Err(CryptoError::Input(format!(
                "seed too short: minimum {KEY_SIZE} bytes, got {}",
                seed.len()
            )));
        }
        let hk = Hkdf::<Sha256>::new(Some(b"strongbox-key-seed"), seed);
        let mut secret = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(alg.as_str().as_bytes(), &mut secret[..])
            .map_err(|e| CryptoError::KeyDerivation(format!("hkdf expand: {e}")))?;
        Self::from_secret_bytes(alg, &secret[..])
    }

    /// Imports a key from its raw secret encoding.
    ///
    /// Ed25519 takes the 32-byte seed; X25519, K256 and P256 take the 32-byte
    /// scalar; symmetric algorithms take the 32-byte key.
    pub fn from_secret_bytes(alg: KeyAlg, bytes: &[u8]) -> CryptoResult<Self> {
        let material = match alg {
            KeyAlg::Ed25519 => {
                let seed = exact_32(alg, bytes)?;
                let secret = ed25519_dalek::SigningKey::from_bytes(&seed);
                KeyMaterial::Ed25519 {
                    public: secret.verifying_key(),
                    secret: Some(secret),
                }
            }
            KeyAlg::X25519 => {
                let mut scalar = exact_32(alg, bytes)?;
                let secret = x25519_secret(&mut scalar);
                KeyMaterial::X25519 {
                    public: x25519_dalek::PublicKey::from(&secret),
                    secret: Some(secret),
                }
            }
            KeyAlg::K256 => {
                let secret = k256::SecretKey::from_slice(bytes)
                    .map_err(|_| CryptoError::Input("invalid k256 secret key".into()))?;
                return Ok(Self::k256_from_secret(secret));
            }
            KeyAlg::P256 => {
                let secret = p256::SecretKey::from_slice(bytes)
                    .map_err(|_| CryptoError::Input("invalid p256 secret key".into()))?;
                return Ok(Self::p256_from_secret(secret));
            }
            KeyAlg::C20P | KeyAlg::XC20P => {
                check_len_32(alg, bytes)?;
                KeyMaterial::Symmetric {
                    alg,
                    key: DerivedKey::from_slice(bytes)?,
                }
            }
        };
        Ok(Self { material })
    }

    /// Imports a public-only key.
    pub fn from_public_bytes(alg: KeyAlg, bytes: &[u8]) -> CryptoResult<Self> {
        let material = match alg {
            KeyAlg::Ed25519 => {
                let raw: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| CryptoError::Input("invalid ed25519 public key length".into()))?;
                let public = ed25519_dalek::VerifyingKey::from_bytes(&raw)
                    .map_err(|_| CryptoError::Input("invalid ed25519 public key".into()))?;
                KeyMaterial::Ed25519 {
                    secret: None,
                    public,
                }
            }
            KeyAlg::X25519 => {
                let raw: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| CryptoError::Input("invalid x25519 public key length".into()))?;
                KeyMaterial::X25519 {
                    secret: None,
                    public: x25519_dalek::PublicKey::from(raw),
                }
            }
            KeyAlg::K256 => {
                let public = k256::PublicKey::from_sec1_bytes(bytes)
                    .map_err(|_| CryptoError::Input("invalid k256 public key".into()))?;
                KeyMaterial::K256 {
                    secret: None,
                    public,
                }
            }
            KeyAlg::P256 => {
                let public = p256::PublicKey::from_sec1_bytes(bytes)
                    .map_err(|_| CryptoError::Input("invalid p256 public key".into()))?;
                KeyMaterial::P256 {
                    secret: None,
                    public,
                }
            }
            KeyAlg::C20P | KeyAlg::XC20P => {
                return Err(CryptoError::Unsupported(format!(
                    "{alg} keys have no public representation"
                )));
            }
        };
        Ok(Self { material })
    }

    fn k256_from_secret(secret: k256::SecretKey) -> Self {
        Self {
            material: KeyMaterial::K256 {
                public: secret.public_key(),
                secret: Some(secret),
            },
        }
    }

    fn p256_from_secret(secret: p256::SecretKey) -> Self {
        Self {
            material: KeyMaterial::P256 {
                public: secret.public_key(),
                secret: Some(secret),
            },
        }
    }

    pub fn algorithm(&self) -> KeyAlg {
        match &self.material {
            KeyMaterial::Ed25519 { .. } => KeyAlg::Ed25519,
            KeyMaterial::X25519 { .. } => KeyAlg::X25519,
            KeyMaterial::K256 { .. } => KeyAlg::K256,
            KeyMaterial::P256 { .. } => KeyAlg::P256,
            KeyMaterial::Symmetric { alg, .. } => *alg,
        }
    }

    /// Whether secret material is present.
    pub fn has_secret(&self) -> bool {
        match &self.material {
            KeyMaterial::Ed25519 { secret, .. } => secret.is_some(),
            KeyMaterial::X25519 { secret, .. } => secret.is_some(),
            KeyMaterial::K256 { secret, .. } => secret.is_some(),
            KeyMaterial::P256 { secret, .. } => secret.is_some(),
            KeyMaterial::Symmetric { .. } => true,
        }
    }

    /// Exports the raw secret encoding accepted by [`Key::from_secret_bytes`].
    pub fn to_secret_bytes(&self) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let bytes = match &self.material {
            KeyMaterial::Ed25519 {
                secret: Some(secret),
                ..
            } => secret.to_bytes().to_vec(),
            KeyMaterial::X25519 {
                secret: Some(secret),
                ..
            } => secret.to_bytes().to_vec(),
            KeyMaterial::K256 {
                secret: Some(secret),
                ..
            } => secret.to_bytes().to_vec(),
            KeyMaterial::P256 {
                secret: Some(secret),
                ..
            } => secret.to_bytes().to_vec(),
            KeyMaterial::Symmetric { key, .. } => key.as_bytes().to_vec(),
            _ => {
                return Err(CryptoError::Unsupported(format!(
                    "{} key has no secret part",
                    self.algorithm()
                )));
            }
        };
        Ok(Zeroizing::new(bytes))
    }

    /// Exports the public encoding (compressed SEC1 for K256 and P256).
    pub fn to_public_bytes(&self) -> CryptoResult<Vec<u8>> {
        match &self.material {
            KeyMaterial::Ed25519 { public, .. } => Ok(public.to_bytes().to_vec()),
            KeyMaterial::X25519 { public, .. } => Ok(public.as_bytes().to_vec()),
            KeyMaterial::K256 { public, .. } => {
                Ok(public.to_encoded_point(true).as_bytes().to_vec())
            }
            KeyMaterial::P256 { public, .. } => {
                Ok(public.to_encoded_point(true).as_bytes().to_vec())
            }
            KeyMaterial::Symmetric { alg, .. } => Err(CryptoError::Unsupported(format!(
                "{alg} keys have no public representation"
            ))),
        }
    }

    /// Returns a public-only copy of an asymmetric key.
    pub fn to_public_key(&self) -> CryptoResult<Key> {
        Key::from_public_bytes(self.algorithm(), &self.to_public_bytes()?)
    }

    /// Signs `message`. Only Ed25519, K256 and P256 (ECDSA/SHA-256) keys sign.
    pub fn sign(&self, message: &[u8]) -> CryptoResult<Vec<u8>> {
        match &self.material {
            KeyMaterial::Ed25519 {
                secret: Some(secret),
                ..
            } => Ok(secret.sign(message).to_bytes().to_vec()),
            KeyMaterial::K256 {
                secret: Some(secret),
                ..
            } => {
                let signer = k256::ecdsa::SigningKey::from(secret);
                let signature: k256::ecdsa::Signature = signer.sign(message);
                Ok(signature.to_bytes().to_vec())
            }
            KeyMaterial::P256 {
                secret: Some(secret),
                ..
            } => {
                let signer = p256::ecdsa::SigningKey::from(secret);
                let signature: p256::ecdsa::Signature = signer.sign(message);
                Ok(signature.to_bytes().to_vec())
            }
            KeyMaterial::Ed25519 { secret: None, .. }
            | KeyMaterial::K256 { secret: None, .. }
            | KeyMaterial::P256 { secret: None, .. } => {
                Err(CryptoError::Unsupported(format!(
                    "{} key has no secret part to sign with",
                    self.algorithm()
                )))
            }
            _ => Err(CryptoError::Unsupported(format!(
                "{} keys cannot sign",
                self.algorithm()
            ))),
        }
    }

    /// Verifies a signature. Malformed or mismatched signatures return `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> CryptoResult<bool> {
        match &self.material {
            KeyMaterial::Ed25519 { public, .. } => {
                let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(public.verify(message, &signature).is_ok())
            }
            KeyMaterial::K256 { public, .. } => {
                let Ok(signature) = k256::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                let verifier = k256::ecdsa::VerifyingKey::from(public);
                Ok(verifier.verify(message, &signature).is_ok())
            }
            KeyMaterial::P256 { public, .. } => {
                let Ok(signature) = p256::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                let verifier = p256::ecdsa::VerifyingKey::from(public);
                Ok(verifier.verify(message, &signature).is_ok())
            }
            _ => Err(CryptoError::Unsupported(format!(
                "{} keys cannot verify signatures",
                self.algorithm()
            ))),
        }
    }

    /// Converts between compatible algorithms. Only Ed25519 to X25519 is defined.
    pub fn convert_key(&self, alg: KeyAlg) -> CryptoResult<Key> {
        match (&self.material, alg) {
            (_, target) if target == self.algorithm() => Ok(self.clone()),
            (KeyMaterial::Ed25519 { secret, public }, KeyAlg::X25519) => {
                let material = match secret {
                    Some(secret) => {
                        let mut scalar = Zeroizing::new(secret.to_scalar_bytes());
                        let secret = x25519_secret(&mut scalar);
                        KeyMaterial::X25519 {
                            public: x25519_dalek::PublicKey::from(&secret),
                            secret: Some(secret),
                        }
                    }
                    None => KeyMaterial::X25519 {
                        secret: None,
                        public: x25519_dalek::PublicKey::from(public.to_montgomery().to_bytes()),
                    },
                };
                Ok(Key { material })
            }
            _ => Err(CryptoError::Unsupported(format!(
                "conversion from {} to {alg}",
                self.algorithm()
            ))),
        }
    }

    pub(crate) fn symmetric_key(&self) -> CryptoResult<(KeyAlg, &DerivedKey)> {
        match &self.material {
            KeyMaterial::Symmetric { alg, key } => Ok((*alg, key)),
            _ => Err(CryptoError::Unsupported(format!(
                "{} is not a symmetric key algorithm",
                self.algorithm()
            ))),
        }
    }

    /// Generates a random nonce of the right length for this AEAD key.
    pub fn aead_random_nonce(&self) -> CryptoResult<Vec<u8>> {
        let (alg, _) = self.symmetric_key()?;
        let len = alg.nonce_len().unwrap_or(12);
        Ok(crate::key::random_bytes(len))
    }

    /// AEAD-encrypts with an explicit nonce; the tag is appended to the output.
    pub fn aead_encrypt(&self, message: &[u8], nonce: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let (alg, key) = self.symmetric_key()?;
        check_nonce(alg, nonce)?;
        let payload = Payload { msg: message, aad };
        let result = match alg {
            KeyAlg::C20P => ChaCha20Poly1305::new(key.as_bytes().into())
                .encrypt(nonce.into(), payload),
            _ => XChaCha20Poly1305::new(key.as_bytes().into()).encrypt(nonce.into(), payload),
        };
        result.map_err(|e| CryptoError::Encryption(format!("{alg}: {e}")))
    }

    /// Inverse of [`Key::aead_encrypt`].
    pub fn aead_decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let (alg, key) = self.symmetric_key()?;
        check_nonce(alg, nonce)?;
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let result = match alg {
            KeyAlg::C20P => ChaCha20Poly1305::new(key.as_bytes().into())
                .decrypt(nonce.into(), payload),
            _ => XChaCha20Poly1305::new(key.as_bytes().into()).decrypt(nonce.into(), payload),
        };
        result
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
    }
}

fn check_nonce(alg: KeyAlg, nonce: &[u8]) -> CryptoResult<()> {
    let expected = alg.nonce_len().unwrap_or(12);
    if nonce.len() != expected {
        return Err(CryptoError::Input(format!(
            "invalid {alg} nonce length: expected {expected}, got {}",
            nonce.len()
        )));
    }
    Ok(())
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        if self.algorithm() != other.algorithm() || self.has_secret() != other.has_secret() {
            return false;
        }
        if let (Ok(a), Ok(b)) = (self.to_public_bytes(), other.to_public_bytes()) {
            if a != b {
                return false;
            }
        }
        match (self.to_secret_bytes(), other.to_secret_bytes()) {
            (Ok(a), Ok(b)) => bool::from(a[..].ct_eq(&b[..])),
            _ => true,
        }
    }
}

impl Eq for Key {}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("Key");
        dbg.field("alg", &self.algorithm())
            .field("has_secret", &self.has_secret());
        if let Ok(public) = self.to_public_bytes() {
            dbg.field("public", &crate::jwk::base64url(&public));
        }
        dbg.finish()
    }
}
