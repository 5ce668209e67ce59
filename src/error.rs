use thiserror::Error;

use crate::kms::KeyType;

/// Closed taxonomy of errors the KMS core may raise.
///
/// Errors surface to the caller unchanged; the core performs no silent
/// recovery and no retries. Remote and disk failures are wrapped in
/// [`KmsError::Backend`] together with the operation that raised them.
#[derive(Error, Debug)]
pub enum KmsError {
    #[error("no key provider registered for key type {0}")]
    UnknownKeyType(KeyType),

    #[error("key id belongs to key type {actual}, provider handles {expected}")]
    IncorrectKeyType { expected: KeyType, actual: KeyType },

    #[error("a key provider is already registered for key type {0}")]
    KeyTypeConflict(KeyType),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid key id: {0}")]
    InvalidKeyId(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("recovery id search exhausted without matching the known public key")]
    RecoveryFailed,

    #[error("backend error during {op}: {message}")]
    Backend { op: &'static str, message: String },
}

impl KmsError {
    /// Wrap a remote or disk failure with the operation that raised it.
    pub fn backend(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            op,
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for KmsError {
    fn from(err: std::io::Error) -> Self {
        KmsError::backend("io", err)
    }
}

pub type Result<T> = std::result::Result<T, KmsError>;
