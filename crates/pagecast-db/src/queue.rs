//! Job queue backed by PostgreSQL.
//!
//! Rows move `pending -> claimed -> completed`. A claim that is never
//! acknowledged (the worker died mid-job) is returned to `pending` by
//! [`PgJobQueue::requeue_stale`]. Live workers refresh `claimed_at` through
//! [`PgJobQueue::refresh_claim`] so their claims never look stale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagecast_core::{JobId, JobQueue, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::DbResult;

/// A row of the `deploy_queue` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedJob {
    pub seq: i64,
    pub job_id: String,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct PgJobQueue {
    pool: PgPool,
    worker_id: String,
    poll_interval: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            poll_interval,
        }
    }

    /// Override the identity recorded in `claimed_by`.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn push(&self, job_id: &JobId) -> DbResult<QueuedJob> {
        let job = sqlx::query_as::<_, QueuedJob>(
            r#"
            INSERT INTO deploy_queue (job_id, status, created_at)
            VALUES ($1, 'pending', NOW())
            RETURNING *
            "#,
        )
        .bind(job_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    /// Claim the oldest pending row.
    /// Uses SKIP LOCKED so concurrent workers never claim the same row.
    pub async fn claim(&self) -> DbResult<Option<QueuedJob>> {
        let job = sqlx::query_as::<_, QueuedJob>(
            r#"
            UPDATE deploy_queue
            SET status = 'claimed', claimed_by = $1, claimed_at = NOW()
            WHERE seq = (
                SELECT seq FROM deploy_queue
                WHERE status = 'pending'
                ORDER BY seq ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(&self.worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// Mark a claimed row whose payload is not a valid job id.
    pub async fn reject(&self, seq: i64) -> DbResult<()> {
        sqlx::query("UPDATE deploy_queue SET status = 'rejected' WHERE seq = $1")
            .bind(seq)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark every claim of this job as completed.
    pub async fn complete(&self, job_id: &JobId) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE deploy_queue SET status = 'completed' WHERE job_id = $1 AND status = 'claimed'",
        )
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Restart the visibility clock of this job's active claim.
    pub async fn refresh_claim(&self, job_id: &JobId) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE deploy_queue SET claimed_at = NOW() WHERE job_id = $1 AND status = 'claimed'",
        )
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Return claims older than `visibility_timeout` to pending.
    pub async fn requeue_stale(&self, visibility_timeout: Duration) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE deploy_queue
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL
            WHERE status = 'claimed'
              AND claimed_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(visibility_timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            info!(requeued, "Requeued stale claims");
        }
        Ok(requeued)
    }

    /// Number of rows waiting to be claimed.
    pub async fn pending_count(&self) -> DbResult<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM deploy_queue WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Claim the next row carrying a valid job id, rejecting any that do not.
    async fn claim_valid(&self) -> DbResult<Option<JobId>> {
        while let Some(job) = self.claim().await? {
            match JobId::parse(job.job_id.as_str()) {
                Ok(id) => {
                    debug!(job_id = %id, seq = job.seq, worker_id = %self.worker_id, "Claimed job");
                    return Ok(Some(id));
                }
                Err(e) => {
                    warn!(seq = job.seq, error = %e, "Rejecting queue entry with invalid job id");
                    self.reject(job.seq).await?;
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job_id: &JobId) -> Result<()> {
        self.push(job_id).await.map_err(|e| e.into_queue_error())?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Option<Duration>) -> Result<Option<JobId>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(id) = self.claim_valid().await.map_err(|e| e.into_queue_error())? {
                return Ok(Some(id));
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    remaining.min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            sleep(wait).await;
        }
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        self.complete(job_id)
            .await
            .map_err(|e| e.into_queue_error())?;
        Ok(())
    }

    async fn touch(&self, job_id: &JobId) -> Result<()> {
        if self
            .refresh_claim(job_id)
            .await
            .map_err(|e| e.into_queue_error())?
            == 0
        {
            warn!(job_id = %job_id, "No active claim to refresh");
        }
        Ok(())
    }
}
