use strongbox_crypto::CryptoError;
use strongbox_storage::StorageError;
use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Coarse error category exposed to wrapper code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Input,
    NotFound,
    Duplicate,
    Encryption,
    Authentication,
    Backend,
    Unsupported,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::NotFound => "not_found",
            Self::Duplicate => "duplicate",
            Self::Encryption => "encryption",
            Self::Authentication => "authentication",
            Self::Backend => "backend",
            Self::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("backend error: {0}")]
    Backend(String),
    /// An overlapping transaction committed first. Retry the whole transaction.
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::Input,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::Encryption(_) => ErrorKind::Encryption,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Backend(_) | Self::Conflict(_) => ErrorKind::Backend,
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// True when repeating the transaction from a fresh session may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub(crate) fn closed() -> Self {
        Self::Input("store is closed".into())
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Input(_) | CryptoError::InvalidKeyLength { .. } => {
                Self::Input(err.to_string())
            }
            CryptoError::Encryption(_)
            | CryptoError::Decryption(_)
            | CryptoError::KeyDerivation(_) => Self::Encryption(err.to_string()),
            CryptoError::Unsupported(msg) => Self::Unsupported(msg),
        }
    }
}

impl From<StorageError> for VaultError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::InvalidUri(msg) => Self::Input(msg),
            StorageError::UnsupportedBackend(scheme) => {
                Self::Unsupported(format!("backend scheme: {scheme}"))
            }
            StorageError::Closed => Self::closed(),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Input(format!("json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_report_backend_kind_and_are_retryable() {
        let err = VaultError::from(StorageError::Conflict("k".into()));
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.is_retryable());
        assert!(!VaultError::Backend("io".into()).is_retryable());
    }

    #[test]
    fn crypto_errors_map_to_distinct_kinds() {
        assert_eq!(
            VaultError::from(CryptoError::Decryption("x".into())).kind(),
            ErrorKind::Encryption
        );
        assert_eq!(
            VaultError::from(CryptoError::Unsupported("p384".into())).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            VaultError::from(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 3
            })
            .kind(),
            ErrorKind::Input
        );
    }

    #[test]
    fn closed_backend_reads_as_closed_store() {
        let err = VaultError::from(StorageError::Closed);
        assert_eq!(err.to_string(), "invalid input: store is closed");
    }
}
