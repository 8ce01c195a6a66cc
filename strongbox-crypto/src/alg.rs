//! Supported key algorithms.

use crate::error::{CryptoError, CryptoResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of key algorithms a [`Key`](crate::Key) can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyAlg {
    /// Ed25519 signing key.
    Ed25519,
    /// X25519 key agreement key.
    X25519,
    /// secp256k1 key usable for ECDSA and ECDH.
    K256,
    /// NIST P-256 (secp256r1) key usable for ECDSA and ECDH.
    P256,
    /// ChaCha20-Poly1305 symmetric key.
    C20P,
    /// XChaCha20-Poly1305 symmetric key.
    XC20P,
}

/// Algorithm names recognised from other implementations but not provided here.
const KNOWN_UNSUPPORTED: &[&str] = &[
    "p384",
    "bls12381g1",
    "bls12381g2",
    "bls12381g1g2",
    "a128gcm",
    "a256gcm",
    "a128cbchs256",
    "a256cbchs512",
    "a128kw",
    "a256kw",
];

impl KeyAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::X25519 => "x25519",
            Self::K256 => "k256",
            Self::P256 => "p256",
            Self::C20P => "c20p",
            Self::XC20P => "xc20p",
        }
    }

    /// Single-byte identifier embedded in wrapped keys.
    pub(crate) fn code(&self) -> u8 {
        match self {
            Self::Ed25519 => 1,
            Self::X25519 => 2,
            Self::K256 => 3,
            Self::P256 => 4,
            Self::C20P => 16,
            Self::XC20P => 17,
        }
    }

    pub(crate) fn from_code(code: u8) -> CryptoResult<Self> {
        match code {
            1 => Ok(Self::Ed25519),
            2 => Ok(Self::X25519),
            3 => Ok(Self::K256),
            4 => Ok(Self::P256),
            16 => Ok(Self::C20P),
            17 => Ok(Self::XC20P),
            other => Err(CryptoError::Unsupported(format!("key algorithm code {other}"))),
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::C20P | Self::XC20P)
    }

    pub fn can_sign(&self) -> bool {
        matches!(self, Self::Ed25519 | Self::K256 | Self::P256)
    }

    pub fn can_agree(&self) -> bool {
        matches!(self, Self::Ed25519 | Self::X25519 | Self::K256 | Self::P256)
    }

    /// Length of the raw secret encoding.
    pub fn secret_len(&self) -> usize {
        32
    }

    /// Length of the raw public encoding, if the algorithm has one.
    pub fn public_len(&self) -> Option<usize> {
        match self {
            Self::Ed25519 | Self::X25519 => Some(32),
            Self::K256 | Self::P256 => Some(33),
            Self::C20P | Self::XC20P => None,
        }
    }

    /// AEAD nonce length for symmetric algorithms.
    pub fn nonce_len(&self) -> Option<usize> {
        match self {
            Self::C20P => Some(12),
            Self::XC20P => Some(24),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlg {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "ed25519" => Ok(Self::Ed25519),
            "x25519" => Ok(Self::X25519),
            "k256" | "secp256k1" => Ok(Self::K256),
            "p256" | "secp256r1" | "prime256v1" => Ok(Self::P256),
            "c20p" | "chacha20poly1305" => Ok(Self::C20P),
            "xc20p" | "xchacha20poly1305" => Ok(Self::XC20P),
            other if KNOWN_UNSUPPORTED.contains(&other) => {
                Err(CryptoError::Unsupported(format!("key algorithm {s}")))
            }
            _ => Err(CryptoError::Input(format!("unknown key algorithm: {s}"))),
        }
    }
}

impl TryFrom<String> for KeyAlg {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyAlg> for String {
    fn from(alg: KeyAlg) -> Self {
        alg.as_str().to_string()
    }
}
