//! Database error types.

use pagecast_core::Error as CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Convert into the core error used by the queue trait.
    pub fn into_queue_error(self) -> CoreError {
        match self {
            DbError::NotFound(msg) => CoreError::NotFound(msg),
            other => CoreError::QueueTransport(other.to_string()),
        }
    }

    /// Convert into the core error used by the status store trait.
    pub fn into_status_error(self) -> CoreError {
        match self {
            DbError::NotFound(msg) => CoreError::NotFound(msg),
            other => CoreError::StatusStore(other.to_string()),
        }
    }
}
