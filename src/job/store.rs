use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::models::{AnalysisJob, JobTransition, TransitionError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} already exists")]
    Duplicate(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("job store backend error: {0}")]
    Backend(String),
}

/// Job status store. Every `update` is an atomic read-modify-write of one
/// record: readers observe either the state before or after a transition.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: AnalysisJob) -> Result<(), StoreError>;

    async fn get(&self, job_id: &str) -> Result<AnalysisJob, StoreError>;

    /// Apply `transition` and return the updated record.
    async fn update(
        &self,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<AnalysisJob, StoreError>;
}

/// Process-local store backed by a map behind a single lock.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, AnalysisJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: AnalysisJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        debug!(job_id = %job.id, "job record created");
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<AnalysisJob, StoreError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    async fn update(
        &self,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<AnalysisJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        job.apply(transition)?;
        debug!(job_id, status = %job.status, progress = job.progress, "job record updated");
        Ok(job.clone())
    }
}
