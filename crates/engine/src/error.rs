//! Cache manager error types and their user-facing classification.

use hoard_registry::RegistryError;
use hoard_sources::SourceError;
use serde::Serialize;
use thiserror::Error;

/// Cache manager errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{identifier} is in use by: {}", .apps.join(", "))]
    InUse {
        identifier: String,
        apps: Vec<String>,
    },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("integrity check failed: {0}")]
    ChecksumMismatch(String),

    #[error(
        "registry corruption detected: {0}. Move the registry file aside and run `hoard sync` to rebuild it"
    )]
    RegistryCorruption(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Source(SourceError),

    #[error(transparent)]
    Registry(RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    UserError,
    TransientIo,
    IntegrityError,
    RegistryCorruption,
    Cancelled,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserError => "user_error",
            Self::TransientIo => "transient_io",
            Self::IntegrityError => "integrity_error",
            Self::RegistryCorruption => "registry_corruption",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Process exit code: 2 for integrity problems, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::IntegrityError | Self::RegistryCorruption => 2,
            _ => 1,
        }
    }
}

impl CacheError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidIdentifier(_)
            | Self::NotFound(_)
            | Self::InUse { .. }
            | Self::AlreadyExists(_)
            | Self::NotAllowed(_)
            | Self::Config(_) => ErrorClass::UserError,
            Self::TransientIo(_) => ErrorClass::TransientIo,
            Self::ChecksumMismatch(_) => ErrorClass::IntegrityError,
            Self::RegistryCorruption(_) => ErrorClass::RegistryCorruption,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Source(_) | Self::Registry(_) | Self::Io(_) => ErrorClass::Internal,
        }
    }

    /// Applications blocking a removal, if that is what failed.
    pub fn blocking_apps(&self) -> Option<&[String]> {
        match self {
            Self::InUse { apps, .. } => Some(apps),
            _ => None,
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::RegistryCorruption(_))
    }
}

impl From<SourceError> for CacheError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(msg) => Self::NotFound(msg),
            SourceError::InvalidIdentifier(msg) => Self::InvalidIdentifier(msg),
            SourceError::NotAllowed(msg) => Self::NotAllowed(msg),
            SourceError::AlreadyExists(msg) => Self::AlreadyExists(msg),
            SourceError::TransientIo(msg) => Self::TransientIo(msg),
            err @ SourceError::ChecksumMismatch { .. } => Self::ChecksumMismatch(err.to_string()),
            SourceError::Cancelled => Self::Cancelled,
            other => Self::Source(other),
        }
    }
}

impl From<RegistryError> for CacheError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(msg) => Self::NotFound(msg),
            RegistryError::AlreadyExists(msg) => Self::AlreadyExists(msg),
            RegistryError::InUse { identifier, apps } => Self::InUse { identifier, apps },
            RegistryError::Corruption(msg) => Self::RegistryCorruption(msg),
            other => Self::Registry(other),
        }
    }
}

impl From<hoard_core::Error> for CacheError {
    fn from(err: hoard_core::Error) -> Self {
        match err {
            hoard_core::Error::Cancelled => Self::Cancelled,
            hoard_core::Error::Io(e) => Self::Io(e),
            hoard_core::Error::Config(msg) => Self::Config(msg),
            other => Self::InvalidIdentifier(other.to_string()),
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
