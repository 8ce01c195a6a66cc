//! Cryptographic error types.

use thiserror::Error;

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the key derivation, key management and encryption layers.
///
/// Messages describe what failed without echoing key material or plaintext.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl CryptoError {
    /// True for failures caused by a wrong key or tampered ciphertext.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Decryption(_))
    }
}
