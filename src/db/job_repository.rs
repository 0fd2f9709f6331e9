use async_trait::async_trait;
use sqlx::types::Json;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error};

use crate::db::models::AnalysisJobRow;
use crate::job::{
    lease_cutoff, AnalysisJob, JobQueue, JobStore, JobTransition, QueueError, StoreError,
};

const JOB_COLUMNS: &str = "id, file_ref, encoding, settings, status, progress, message, \
     result_ref, error, created_at, started_at, completed_at, updated_at";

/// Claims the oldest deliverable job. `$1` is the lease cutoff: a job whose
/// last dispatch is older than it was never picked up by its worker, and a
/// PROCESSING job not updated since then lost its worker mid-run.
const CLAIM_NEXT_SQL: &str = r#"
UPDATE analysis_jobs
SET dispatched_at = NOW()
WHERE id = (
    SELECT id FROM analysis_jobs
    WHERE queued_at IS NOT NULL
      AND (dispatched_at IS NULL OR dispatched_at <= $1)
      AND (status = 'pending' OR (status = 'processing' AND updated_at <= $1))
    ORDER BY queued_at
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
RETURNING id
"#;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Job status store backed by the `analysis_jobs` table.
///
/// Each transition runs in its own transaction holding a row lock, so
/// concurrent updates of the same job are serialised by Postgres.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: AnalysisJob) -> Result<(), StoreError> {
        debug!(job_id = %job.id, "Creating analysis job");

        let result = sqlx::query(
            r#"
            INSERT INTO analysis_jobs
                (id, file_ref, encoding, settings, status, progress, message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&job.id)
        .bind(&job.file_ref)
        .bind(job.encoding.map(|e| e.to_string()))
        .bind(Json(&job.settings))
        .bind(job.status.as_str())
        .bind(i16::from(job.progress))
        .bind(&job.message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate(job.id))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn get(&self, job_id: &str) -> Result<AnalysisJob, StoreError> {
        let row = sqlx::query_as::<_, AnalysisJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        AnalysisJob::try_from(row).map_err(StoreError::Backend)
    }

    async fn update(
        &self,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<AnalysisJob, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query_as::<_, AnalysisJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        let mut job = AnalysisJob::try_from(row).map_err(StoreError::Backend)?;
        // dropping `tx` on error rolls back and releases the row lock
        job.apply(transition)?;

        sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = $2, progress = $3, message = $4, result_ref = $5, error = $6,
                started_at = $7, completed_at = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(i16::from(job.progress))
        .bind(&job.message)
        .bind(&job.result_ref)
        .bind(job.error.as_ref().map(Json))
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        debug!(job_id, status = %job.status, progress = job.progress, "Job updated");
        Ok(job)
    }
}

/// Dispatch through the `analysis_jobs` table.
///
/// `enqueue` marks a job as queued; `dequeue` claims the oldest queued
/// job with `FOR UPDATE SKIP LOCKED` so concurrent workers never claim the
/// same row, polling while the table is idle. Deliveries whose worker went
/// away are handed out again once `lease` has passed.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: Pool<Postgres>,
    poll_interval: Duration,
    lease: Duration,
}

impl PgJobQueue {
    pub fn new(pool: Pool<Postgres>, poll_interval: Duration, lease: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            lease,
        }
    }

    async fn claim_next(&self) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(CLAIM_NEXT_SQL)
            .bind(lease_cutoff(Utc::now(), self.lease))
            .fetch_optional(&self.pool)
            .await
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE analysis_jobs SET queued_at = NOW(), dispatched_at = NULL WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => Err(QueueError::Backend(format!("job {job_id} does not exist"))),
            Err(e) => {
                error!(job_id, error = %e, "Failed to enqueue job");
                Err(QueueError::Backend(e.to_string()))
            }
        }
    }

    async fn dequeue(&self) -> Option<String> {
        loop {
            match self.claim_next().await {
                Ok(Some(job_id)) => {
                    debug!(job_id = %job_id, "Claimed queued job");
                    return Some(job_id);
                }
                Ok(None) => sleep(self.poll_interval).await,
                Err(e) => {
                    error!(error = %e, "Failed to claim next job");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
