//! Job-scoped error types.

use pagecast_builder::BuildError;
use pagecast_core::DeploymentStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source not found for job {job_id} (tried {tried:?})")]
    SourceNotFound { job_id: String, tried: Vec<String> },

    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] pagecast_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a job ended in `failed`.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("status update failed: {0}")]
    Status(pagecast_core::Error),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("job already {0}")]
    Superseded(DeploymentStatus),
}
