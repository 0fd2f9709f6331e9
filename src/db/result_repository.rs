use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use tracing::debug;

use crate::db::models::AnalysisResultRow;
use crate::job::{NewResult, ResultStore, ResultStoreError, StoredResult};

/// Result persistence backed by the `analysis_results` table.
#[derive(Clone)]
pub struct PgResultStore {
    pool: Pool<Postgres>,
}

impl PgResultStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn save(&self, result: NewResult) -> Result<String, ResultStoreError> {
        let stored = result.into_stored();
        debug!(job_id = %stored.job_id, result_id = %stored.id, "Saving analysis result");

        sqlx::query(
            r#"
            INSERT INTO analysis_results (id, job_id, file_ref, settings, metrics, analyzed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_id) DO UPDATE
            SET id = EXCLUDED.id, file_ref = EXCLUDED.file_ref, settings = EXCLUDED.settings,
                metrics = EXCLUDED.metrics, analyzed_at = EXCLUDED.analyzed_at
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.job_id)
        .bind(&stored.file_ref)
        .bind(Json(&stored.settings))
        .bind(Json(&stored.metrics))
        .bind(stored.analyzed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ResultStoreError::Backend(e.to_string()))?;

        Ok(stored.id)
    }

    async fn get(&self, result_id: &str) -> Result<StoredResult, ResultStoreError> {
        sqlx::query_as::<_, AnalysisResultRow>(
            r#"
            SELECT id, job_id, file_ref, settings, metrics, analyzed_at
            FROM analysis_results
            WHERE id = $1
            "#,
        )
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ResultStoreError::Backend(e.to_string()))?
        .map(StoredResult::from)
        .ok_or_else(|| ResultStoreError::NotFound(result_id.to_string()))
    }

    async fn discard(&self, result_id: &str) -> Result<(), ResultStoreError> {
        sqlx::query("DELETE FROM analysis_results WHERE id = $1")
            .bind(result_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ResultStoreError::Backend(e.to_string()))?;
        debug!(result_id, "Discarded analysis result");
        Ok(())
    }
}
