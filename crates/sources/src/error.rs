//! Source adapter error types.

use thiserror::Error;

/// Source adapter errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("path not allowed: {0}")]
    NotAllowed(String),

    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}

impl From<hoard_core::Error> for SourceError {
    fn from(err: hoard_core::Error) -> Self {
        match err {
            hoard_core::Error::Cancelled => Self::Cancelled,
            hoard_core::Error::Io(e) => Self::Io(e),
            other => Self::InvalidIdentifier(other.to_string()),
        }
    }
}

/// Result type for source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;
