//! Worker that processes jobs from the queue.

use pagecast_core::{JobId, JobQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{DeploymentPipeline, JobOutcome};

/// A worker that pops job ids and runs them one at a time.
pub struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<DeploymentPipeline>,
    retry_delay: Duration,
    heartbeat_interval: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        pipeline: Arc<DeploymentPipeline>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            pipeline,
            retry_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
        }
    }

    /// Delay before retrying after a queue transport error.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// How often an in-progress job's claim is refreshed.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Run the worker loop until `shutdown` is cancelled.
    ///
    /// A job already dequeued is finished before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "Starting worker");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.queue.dequeue(None) => next,
            };

            match next {
                Ok(Some(job_id)) => {
                    self.handle(&job_id).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, retry_in = ?self.retry_delay, "Failed to dequeue job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Run one job and acknowledge it, whatever the outcome.
    pub async fn handle(&self, job_id: &JobId) -> JobOutcome {
        info!(worker_id = %self.id, job_id = %job_id, "Claimed job");
        let process = self.pipeline.process(job_id);
        tokio::pin!(process);
        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                outcome = &mut process => break outcome,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.queue.touch(job_id).await {
                        warn!(job_id = %job_id, error = %e, "Failed to refresh job claim");
                    }
                }
            }
        };

        if let Err(e) = self.queue.ack(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to acknowledge job");
        }
        outcome
    }
}
