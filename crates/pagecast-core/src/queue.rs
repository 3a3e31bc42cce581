//! Job queue and status store traits.
//!
//! Both are shared by every worker instance and the ingestion side, so
//! implementations must be safe for concurrent use without external locking.

use async_trait::async_trait;
use std::time::Duration;

use crate::{DeploymentStatus, JobId, Result};

/// A durable FIFO of pending job ids.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job id to the tail of the queue.
    async fn enqueue(&self, job_id: &JobId) -> Result<()>;

    /// Remove and return the head of the queue, waiting until one is available.
    ///
    /// Returns `Ok(None)` once `timeout` elapses without work. `None` waits
    /// indefinitely. Connectivity failures are `Error::QueueTransport`.
    async fn dequeue(&self, timeout: Option<Duration>) -> Result<Option<JobId>>;

    /// Acknowledge that a dequeued job reached a terminal state.
    ///
    /// Queues without delivery tracking treat this as a no-op.
    async fn ack(&self, job_id: &JobId) -> Result<()> {
        let _ = job_id;
        Ok(())
    }

    /// Signal that a dequeued job is still being worked on, so queues with
    /// a visibility timeout do not hand it to another consumer.
    ///
    /// Queues without delivery tracking treat this as a no-op.
    async fn touch(&self, job_id: &JobId) -> Result<()> {
        let _ = job_id;
        Ok(())
    }
}

/// Current lifecycle status per job id. Last write wins; no history is kept.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn set_status(&self, job_id: &JobId, status: DeploymentStatus) -> Result<()>;

    /// `Ok(None)` when the id was never written.
    async fn get_status(&self, job_id: &JobId) -> Result<Option<DeploymentStatus>>;
}
