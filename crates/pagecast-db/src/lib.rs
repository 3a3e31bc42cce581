//! PostgreSQL persistence for pagecast.
//!
//! Provides the durable job queue and the status store shared by the
//! ingestion service and every worker.

pub mod error;
pub mod queue;
pub mod status;

pub use error::{DbError, DbResult};
pub use queue::{PgJobQueue, QueuedJob};
pub use status::{PgStatusStore, StatusRecord};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
