//! The long-running deployment worker.

use anyhow::{Context, Result};
use pagecast_builder::NpmBuilder;
use pagecast_config::SystemConfig;
use pagecast_db::{PgJobQueue, PgStatusStore, create_pool};
use pagecast_scheduler::{DeploymentPipeline, SyncEngine, Worker};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Claims are refreshed this many times per visibility timeout.
const HEARTBEATS_PER_TIMEOUT: u32 = 4;

pub async fn run(
    config: Option<&Path>,
    id: Option<String>,
    keep_workspace: bool,
    keep_failed_workspace: bool,
) -> Result<()> {
    let config = SystemConfig::load(config)?;
    let store = pagecast_storage::from_config(&config.storage)?;
    info!(storage = store.name(), "Object store ready");

    let pool = create_pool(&config.queue.database_url)
        .await
        .context("Failed to connect to database")?;

    let mut queue = PgJobQueue::new(pool.clone(), config.queue.poll_interval);
    if let Some(id) = id {
        queue = queue.with_worker_id(id);
    }
    let worker_id = queue.worker_id().to_string();

    let requeued = queue
        .requeue_stale(config.queue.visibility_timeout)
        .await
        .context("Failed to requeue stale claims")?;
    if requeued > 0 {
        info!(count = requeued, "Requeued stale jobs");
    }

    tokio::fs::create_dir_all(&config.worker.workspace)
        .await
        .with_context(|| format!("Failed to create {}", config.worker.workspace.display()))?;

    let builder = NpmBuilder::new(&config.worker.npm).with_timeout(config.worker.build_timeout);
    let sync = SyncEngine::new(store, config.worker.workspace.clone())
        .with_concurrency(config.worker.transfer_concurrency);
    let pipeline = DeploymentPipeline::new(
        sync,
        Arc::new(builder),
        Arc::new(PgStatusStore::new(pool)),
    )
    .keep_workspace(keep_workspace)
    .keep_failed_workspace(keep_failed_workspace);

    let worker = Worker::new(worker_id, Arc::new(queue), Arc::new(pipeline))
        .with_retry_delay(config.worker.retry_delay)
        .with_heartbeat_interval(config.queue.visibility_timeout / HEARTBEATS_PER_TIMEOUT);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested, finishing current job");
            }
            shutdown.cancel();
        }
    });

    worker.run(shutdown).await;
    info!("Worker stopped");
    Ok(())
}
