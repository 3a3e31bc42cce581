//! Queue and status maintenance commands.

use anyhow::{Context, Result};
use pagecast_config::QueueConfig;
use pagecast_core::{DeploymentStatus, JobId};
use pagecast_db::{PgJobQueue, PgStatusStore, create_pool, run_migrations};
use std::path::Path;
use tracing::info;

/// Mark an already-uploaded job queued and push it onto the queue.
pub async fn enqueue(config: Option<&Path>, id: &str) -> Result<()> {
    let job_id = JobId::parse(id).with_context(|| format!("Invalid job id {:?}", id))?;
    let queue_config = QueueConfig::load(config)?;
    let pool = create_pool(&queue_config.database_url)
        .await
        .context("Failed to connect to database")?;

    PgStatusStore::new(pool.clone())
        .upsert(&job_id, DeploymentStatus::Queued)
        .await?;
    let queued = PgJobQueue::new(pool, queue_config.poll_interval)
        .push(&job_id)
        .await?;

    info!(job_id = %job_id, seq = queued.seq, "Job enqueued");
    println!("Queued {}", job_id);
    Ok(())
}

pub async fn status(config: Option<&Path>, id: &str) -> Result<()> {
    let job_id = JobId::parse(id).with_context(|| format!("Invalid job id {:?}", id))?;
    let queue_config = QueueConfig::load(config)?;
    let pool = create_pool(&queue_config.database_url)
        .await
        .context("Failed to connect to database")?;

    match PgStatusStore::new(pool).get_record(&job_id).await? {
        Some(record) => println!(
            "{}: {} (updated {})",
            job_id,
            record.status()?,
            record.updated_at.to_rfc3339()
        ),
        None => println!("{}: not-found", job_id),
    }
    Ok(())
}

pub async fn migrate(config: Option<&Path>) -> Result<()> {
    let queue_config = QueueConfig::load(config)?;
    let pool = create_pool(&queue_config.database_url)
        .await
        .context("Failed to connect to database")?;

    info!("Running migrations...");
    run_migrations(&pool).await.context("Migration failed")?;
    println!("Migrations applied");
    Ok(())
}
