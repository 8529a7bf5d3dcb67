//! Error types for the review-history subsystem
//!
//! Structured error definitions use thiserror; anyhow errors from callers are
//! folded into [`ReviewHistoryError::Other`].

use std::time::Duration;
use thiserror::Error;

/// Main error type for review-history operations
#[derive(Error, Debug)]
pub enum ReviewHistoryError {
    /// Backend cannot be initialized or reached (unwritable directory,
    /// connection refused, invalid credentials)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Expected record does not exist
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Some records failed to transfer during a File -> SQL migration
    #[error("Migration partially failed: {failed} of {attempted} records could not be transferred")]
    MigrationPartialFailure { attempted: usize, failed: usize },

    /// A snapshot with the same (repository, PR number, timestamp) already exists
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Schema migration failed
    #[error("Schema migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage call exceeded its time budget
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid operation or malformed input
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for review-history operations
pub type Result<T> = std::result::Result<T, ReviewHistoryError>;

impl ReviewHistoryError {
    /// Whether the error means the backend itself is unusable
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ReviewHistoryError::StorageUnavailable(_) | ReviewHistoryError::Timeout(_)
        )
    }
}

impl From<libsql::Error> for ReviewHistoryError {
    fn from(err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.contains("UNIQUE constraint failed") {
            ReviewHistoryError::AlreadyExists(message)
        } else {
            ReviewHistoryError::Database(message)
        }
    }
}

impl From<sqlx::Error> for ReviewHistoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ReviewHistoryError::AlreadyExists(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                ReviewHistoryError::StorageUnavailable(err.to_string())
            }
            sqlx::Error::RowNotFound => ReviewHistoryError::RecordNotFound(err.to_string()),
            _ => ReviewHistoryError::Database(err.to_string()),
        }
    }
}

/// Convert anyhow::Error to ReviewHistoryError
impl From<anyhow::Error> for ReviewHistoryError {
    fn from(err: anyhow::Error) -> Self {
        ReviewHistoryError::Other(err.to_string())
    }
}
