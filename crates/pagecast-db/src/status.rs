//! Deployment status store backed by PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagecast_core::{DeploymentStatus, JobId, Result, StatusStore};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// A row of the `deployment_status` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusRecord {
    pub job_id: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn status(&self) -> DbResult<DeploymentStatus> {
        self.status
            .parse()
            .map_err(|_| DbError::Corrupt(format!("job {} has status {:?}", self.job_id, self.status)))
    }
}

pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, job_id: &JobId, status: DeploymentStatus) -> DbResult<StatusRecord> {
        let record = sqlx::query_as::<_, StatusRecord>(
            r#"
            INSERT INTO deployment_status (job_id, status, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (job_id) DO UPDATE
            SET status = EXCLUDED.status, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(job_id.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn get_record(&self, job_id: &JobId) -> DbResult<Option<StatusRecord>> {
        let record =
            sqlx::query_as::<_, StatusRecord>("SELECT * FROM deployment_status WHERE job_id = $1")
                .bind(job_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn set_status(&self, job_id: &JobId, status: DeploymentStatus) -> Result<()> {
        self.upsert(job_id, status)
            .await
            .map_err(|e| e.into_status_error())?;
        Ok(())
    }

    async fn get_status(&self, job_id: &JobId) -> Result<Option<DeploymentStatus>> {
        let record = self
            .get_record(job_id)
            .await
            .map_err(|e| e.into_status_error())?;
        record
            .map(|r| r.status())
            .transpose()
            .map_err(|e| e.into_status_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str) -> StatusRecord {
        StatusRecord {
            job_id: "abc".to_string(),
            status: status.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_status_parsing() {
        assert_eq!(record("deploying").status().unwrap(), DeploymentStatus::Deploying);
        assert!(matches!(record("exploded").status(), Err(DbError::Corrupt(_))));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_last_write_wins() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::create_pool(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let store = PgStatusStore::new(pool);
        let id = JobId::generate();

        assert_eq!(store.get_status(&id).await.unwrap(), None);
        store.set_status(&id, DeploymentStatus::Queued).await.unwrap();
        store.set_status(&id, DeploymentStatus::Building).await.unwrap();
        assert_eq!(
            store.get_status(&id).await.unwrap(),
            Some(DeploymentStatus::Building)
        );
    }
}
