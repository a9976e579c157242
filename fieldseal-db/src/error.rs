//! Error types for the database layer.

use fieldseal_crypto::CryptoError;
use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in database operations.
///
/// Failures to open an envelope on read are not errors: those values are
/// returned as stored.
#[derive(Debug, Error)]
pub enum DbError {
    /// Statement or connection error from SQLite.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The key could not be obtained for a write.
    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    /// A table or column name that cannot be used as an SQL identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// The caller supplied input the store cannot turn into a statement.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A single-row update touched some other number of rows.
    #[error("expected to update one row, matched {0}")]
    RowCount(usize),

    /// The store has been closed.
    #[error("store closed: {0}")]
    Closed(String),

    /// A blocking database task panicked or was cancelled.
    #[error("database task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::Task(err.to_string())
    }
}
