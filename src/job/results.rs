use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::metrics::AnalysisResult;
use crate::slicer::PrintSettings;

#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("result {0} not found")]
    NotFound(String),
    #[error("result backend error: {0}")]
    Backend(String),
}

/// What gets persisted for one successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: String,
    pub job_id: String,
    pub file_ref: String,
    pub settings: PrintSettings,
    pub metrics: AnalysisResult,
    pub analyzed_at: DateTime<Utc>,
}

/// Fields supplied by the pipeline; the store assigns `id` and `analyzed_at`.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub job_id: String,
    pub file_ref: String,
    pub settings: PrintSettings,
    pub metrics: AnalysisResult,
}

impl NewResult {
    pub fn into_stored(self) -> StoredResult {
        StoredResult {
            id: Uuid::new_v4().to_string(),
            job_id: self.job_id,
            file_ref: self.file_ref,
            settings: self.settings,
            metrics: self.metrics,
            analyzed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a result and return its reference. A job keeps at most one
    /// result: an earlier one left by an interrupted run is replaced.
    async fn save(&self, result: NewResult) -> Result<String, ResultStoreError>;

    async fn get(&self, result_id: &str) -> Result<StoredResult, ResultStoreError>;

    /// Remove a result whose job could not be completed. Absent ids are ignored.
    async fn discard(&self, result_id: &str) -> Result<(), ResultStoreError>;
}

#[derive(Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<String, StoredResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save(&self, result: NewResult) -> Result<String, ResultStoreError> {
        let stored = result.into_stored();
        let id = stored.id.clone();
        let mut results = self.results.write().await;
        results.retain(|_, existing| existing.job_id != stored.job_id);
        results.insert(id.clone(), stored);
        Ok(id)
    }

    async fn get(&self, result_id: &str) -> Result<StoredResult, ResultStoreError> {
        self.results
            .read()
            .await
            .get(result_id)
            .cloned()
            .ok_or_else(|| ResultStoreError::NotFound(result_id.to_string()))
    }

    async fn discard(&self, result_id: &str) -> Result<(), ResultStoreError> {
        self.results.write().await.remove(result_id);
        Ok(())
    }
}
