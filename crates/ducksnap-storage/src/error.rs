// Error types for record store operations

use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors a record store backend can report
#[derive(Debug, Error)]
pub enum StoreError {
    /// DATABASE_URL was not provided
    #[error("DATABASE_URL is not set")]
    NotConfigured,

    /// Could not open or keep a connection to the store
    #[error("connection error: {0}")]
    Connection(String),

    /// Query, constraint or transaction failure
    #[error("database error: {0}")]
    Database(String),

    /// Payload could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Store deliberately taken offline (test backends)
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the failure happened before any statement reached the store
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::NotConfigured | StoreError::Connection(_) | StoreError::Unavailable(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(_)
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => StoreError::Connection(err.to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
