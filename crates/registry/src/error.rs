//! Registry error types.

use thiserror::Error;

/// SQLite primary result codes that mean the database file cannot be trusted.
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

/// Registry operation errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{identifier} is in use by: {}", .apps.join(", "))]
    InUse {
        identifier: String,
        apps: Vec<String>,
    },

    #[error("registry corruption detected: {0}")]
    Corruption(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            if matches!(primary, Some(SQLITE_CORRUPT | SQLITE_NOTADB)) {
                return Self::Corruption(db_err.message().to_string());
            }
        }
        Self::Database(err)
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
