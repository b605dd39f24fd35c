//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
