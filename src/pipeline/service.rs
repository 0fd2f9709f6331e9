use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use super::Collaborators;
use crate::files::FileSourceError;
use crate::geometry::{GeometryEncoding, GeometryRejection, GeometryValidator};
use crate::job::{
    AnalysisJob, JobError, JobErrorKind, JobStatusView, JobTransition, ProgressEvent,
    ResultStoreError, StoreError, StoredResult,
};
use crate::slicer::PrintSettings;
use crate::workspace::is_valid_job_id;

const TERMINAL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Request to analyse one uploaded mesh.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AnalysisRequest {
    #[validate(length(min = 1, max = 1024, message = "file_ref must be 1 to 1024 characters"))]
    pub file_ref: String,
    /// Caller-assigned id; generated when absent.
    #[validate(length(min = 1, max = 64, message = "job_id must be 1 to 64 characters"))]
    pub job_id: Option<String>,
    #[serde(default)]
    pub encoding: Option<GeometryEncoding>,
    #[serde(default)]
    #[validate(nested)]
    pub settings: PrintSettings,
}

impl AnalysisRequest {
    pub fn new(file_ref: impl Into<String>, settings: PrintSettings) -> Self {
        Self {
            file_ref: file_ref.into(),
            job_id: None,
            encoding: None,
            settings,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// Service-level errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Invalid(#[from] ValidationErrors),
    #[error("job id '{0}' may only contain letters, digits, '-' and '_'")]
    InvalidJobId(String),
    #[error("geometry rejected: {0}")]
    Rejected(#[from] GeometryRejection),
    #[error(transparent)]
    File(#[from] FileSourceError),
    #[error("job {0} already exists")]
    Duplicate(String),
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("result {0} not found")]
    ResultNotFound(String),
    #[error("job {0} did not finish in time")]
    StillRunning(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::JobNotFound(id),
            StoreError::Duplicate(id) => ServiceError::Duplicate(id),
            other => ServiceError::Unavailable(other.to_string()),
        }
    }
}

impl From<ResultStoreError> for ServiceError {
    fn from(e: ResultStoreError) -> Self {
        match e {
            ResultStoreError::NotFound(id) => ServiceError::ResultNotFound(id),
            other => ServiceError::Unavailable(other.to_string()),
        }
    }
}

/// Caller-facing side of the pipeline: submission and read-only queries.
#[derive(Clone)]
pub struct AnalysisService {
    collaborators: Collaborators,
    validator: GeometryValidator,
}

impl AnalysisService {
    pub fn new(collaborators: Collaborators, validator: GeometryValidator) -> Self {
        Self {
            collaborators,
            validator,
        }
    }

    /// Submit a mesh for analysis
    ///
    /// # Business Logic
    /// - Validates the request and its settings
    /// - Validates the geometry; a rejected mesh never becomes a job
    /// - Creates the job record in PENDING and enqueues it
    ///
    /// # Returns
    /// - `Ok(job_id)` - Job accepted; progress is observed through `status`
    /// - `Err(ServiceError)` - Nothing was created
    pub async fn submit(&self, request: AnalysisRequest) -> Result<String, ServiceError> {
        request.validate()?;

        let job_id = request
            .job_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if !is_valid_job_id(&job_id) {
            return Err(ServiceError::InvalidJobId(job_id));
        }

        let path = self.collaborators.files.fetch(&request.file_ref).await?;
        let validator = self.validator.clone();
        let encoding = request.encoding;
        let report = tokio::task::spawn_blocking(move || validator.validate(&path, encoding))
            .await
            .map_err(|e| ServiceError::Unavailable(format!("validation task failed: {e}")))?
            .map_err(|rejection| {
                warn!(file_ref = %request.file_ref, reason = %rejection, "submission rejected");
                rejection
            })?;

        let job = AnalysisJob::new(&job_id, request.file_ref, Some(report.encoding), request.settings);
        let event = ProgressEvent::from(&job);
        self.collaborators.jobs.insert(job).await?;
        self.collaborators.events.publish(event);

        if let Err(e) = self.collaborators.queue.enqueue(&job_id).await {
            error!(job_id = %job_id, error = %e, "failed to enqueue job");
            let failure = JobError::new(JobErrorKind::InternalError, format!("job could not be queued: {e}"));
            if let Err(e) = self.collaborators.jobs.update(&job_id, JobTransition::Fail(failure)).await {
                error!(job_id = %job_id, error = %e, "failed to mark unqueued job as failed");
            }
            return Err(ServiceError::Unavailable(e.to_string()));
        }

        info!(
            job_id = %job_id,
            encoding = %report.encoding,
            triangles = report.triangle_count,
            "job submitted"
        );
        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatusView, ServiceError> {
        Ok(self.collaborators.jobs.get(job_id).await?.view())
    }

    pub async fn result(&self, result_id: &str) -> Result<StoredResult, ServiceError> {
        Ok(self.collaborators.results.get(result_id).await?)
    }

    /// Poll until the job reaches a terminal state or `timeout` elapses.
    pub async fn await_terminal(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<JobStatusView, ServiceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let view = self.status(job_id).await?;
            if view.status.is_terminal() {
                return Ok(view);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ServiceError::StillRunning(job_id.to_string()));
            }
            tokio::time::sleep(TERMINAL_POLL_INTERVAL).await;
        }
    }
}
