// error.rs - PKI Error Taxonomy

use thiserror::Error;

/// Errors surfaced by the peer PKI.
///
/// Failures on individual stored records (bad bytes, bad signatures) are
/// logged and skipped where they are found; only caller-facing failures
/// reach this type.
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("Signing failure rate {rate} outside 1..=10")]
    OutOfRange { rate: i32 },

    #[error("Operation not permitted on the owner's own identity: {0}")]
    SelfReferenceDenied(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for PkiError {
    fn from(err: sled::Error) -> Self {
        PkiError::StorageUnavailable(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for PkiError {
    fn from(err: bincode::error::EncodeError) -> Self {
        PkiError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for PkiError {
    fn from(err: bincode::error::DecodeError) -> Self {
        PkiError::Serialization(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PkiError>;
