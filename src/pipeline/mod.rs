//! Job orchestration: drives one job from PENDING to a terminal state.

pub mod service;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::files::{FileSource, FileSourceError};
use crate::geometry::{GeometryEncoding, GeometryRejection, GeometryReport, GeometryValidator};
use crate::job::{
    AnalysisJob, JobError, JobErrorKind, JobQueue, JobStatus, JobStore, JobTransition, NewResult,
    ProgressEvent, ProgressSink, ResultStore, ResultStoreError, StoreError, TransitionError,
};
use crate::metrics::{collect_metrics, AnalysisResult};
use crate::slicer::{EngineError, SlicingEngine};
use crate::workspace::{Workspace, WorkspaceError, WorkspaceManager};

pub use service::{AnalysisRequest, AnalysisService, ServiceError};

/// Boundary collaborators shared by the submit side and the workers.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub files: Arc<dyn FileSource>,
    pub results: Arc<dyn ResultStore>,
    pub events: Arc<dyn ProgressSink>,
}

/// Every way a job can fail once a worker owns it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("geometry rejected: {0}")]
    Rejected(#[from] GeometryRejection),
    #[error(transparent)]
    FileSource(#[from] FileSourceError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to record job state: {0}")]
    Store(#[from] StoreError),
    #[error("failed to persist result: {0}")]
    Results(#[from] ResultStoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            PipelineError::Rejected(_) => JobErrorKind::ValidationRejected,
            PipelineError::FileSource(_) => JobErrorKind::FileSourceError,
            PipelineError::Workspace(_) => JobErrorKind::WorkspaceError,
            PipelineError::Engine(EngineError::Timeout(_)) => JobErrorKind::Timeout,
            PipelineError::Engine(EngineError::MissingOutput(_)) => JobErrorKind::MissingOutput,
            PipelineError::Engine(_) => JobErrorKind::EngineError,
            PipelineError::Store(_) | PipelineError::Results(_) => JobErrorKind::PersistenceError,
            PipelineError::Internal(_) => JobErrorKind::InternalError,
        }
    }

    pub fn to_job_error(&self) -> JobError {
        JobError::new(self.kind(), self.to_string())
    }
}

/// How a call to [`AnalysisPipeline::process`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed { result_ref: String },
    Failed(JobError),
    /// The job was neither PENDING nor PROCESSING with an expired lease,
    /// typically a redelivery of a job another worker still owns. Nothing
    /// was touched.
    Skipped,
}

/// How long a PROCESSING job may go without a state write before another
/// worker may take it over.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(360);

pub struct AnalysisPipeline {
    collaborators: Collaborators,
    validator: GeometryValidator,
    workspaces: WorkspaceManager,
    engine: Arc<dyn SlicingEngine>,
    lease: Duration,
}

impl AnalysisPipeline {
    pub fn new(
        collaborators: Collaborators,
        validator: GeometryValidator,
        workspaces: WorkspaceManager,
        engine: Arc<dyn SlicingEngine>,
    ) -> Self {
        Self {
            collaborators,
            validator,
            workspaces,
            engine,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Execute one job to a terminal state.
    ///
    /// # Business Logic
    /// - Claims the job (PENDING -> PROCESSING). A PROCESSING job whose
    ///   lease expired and whose workspace no local worker holds was left
    ///   by a crashed worker and is reclaimed; anything else is skipped
    /// - Validates the mesh, acquires a workspace, runs the engine, parses
    ///   metrics, reporting progress 0/20/50/80
    /// - Releases the workspace on every path before the terminal
    ///   transition is written
    /// - Persists the result once, then marks the job COMPLETED. If that
    ///   final write fails the result is discarded again
    ///
    /// Never returns an error: failures end up on the job record.
    pub async fn process(&self, job_id: &str) -> ProcessOutcome {
        let Some(job) = self.claim(job_id).await else {
            return ProcessOutcome::Skipped;
        };
        info!(job_id, file_ref = %job.file_ref, "processing started");

        let mut workspace = None;
        let executed = self.execute(&job, &mut workspace).await;
        let released = match workspace.as_mut() {
            Some(ws) => ws.release().await,
            None => Ok(()),
        };

        let outcome = match (executed, released) {
            (Ok(metrics), Ok(())) => self.persist(&job, metrics).await,
            (Ok(_), Err(release_error)) => Err(PipelineError::Workspace(release_error)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => {
                error!(job_id, error = %release_error, "workspace release failed after job failure");
                Err(e)
            }
        };

        match outcome {
            Ok(result_ref) => {
                match self
                    .transition(job_id, JobTransition::Complete { result_ref: result_ref.clone() })
                    .await
                {
                    Ok(_) => {
                        info!(job_id, result_ref = %result_ref, "job completed");
                        ProcessOutcome::Completed { result_ref }
                    }
                    Err(e) => {
                        if let Err(discard_error) =
                            self.collaborators.results.discard(&result_ref).await
                        {
                            error!(job_id, result_ref = %result_ref, error = %discard_error, "failed to discard orphaned result");
                        }
                        self.fail(job_id, PipelineError::Store(e)).await
                    }
                }
            }
            Err(e) => self.fail(job_id, e).await,
        }
    }

    async fn claim(&self, job_id: &str) -> Option<AnalysisJob> {
        let start_error = match self.transition(job_id, JobTransition::Start).await {
            Ok(job) => return Some(job),
            Err(e) => e,
        };
        let interrupted = matches!(
            start_error,
            StoreError::Transition(TransitionError::IllegalState {
                status: JobStatus::Processing,
                ..
            })
        );
        if !interrupted || self.workspaces.is_held(job_id) {
            match start_error {
                StoreError::Transition(e) => {
                    warn!(job_id, error = %e, "job already claimed, skipping delivery")
                }
                e => error!(job_id, error = %e, "failed to claim job"),
            }
            return None;
        }

        match self
            .transition(job_id, JobTransition::Reclaim { lease: self.lease })
            .await
        {
            Ok(job) => {
                warn!(job_id, progress = job.progress, "reclaimed job from an interrupted worker");
                Some(job)
            }
            Err(StoreError::Transition(e)) => {
                warn!(job_id, error = %e, "job still owned by another worker, skipping delivery");
                None
            }
            Err(e) => {
                error!(job_id, error = %e, "failed to reclaim job");
                None
            }
        }
    }

    /// Remove workspace directories left behind by a previous run whose jobs
    /// already ended or no longer exist. Directories of PROCESSING jobs stay
    /// until the job is reclaimed. Returns how many were removed.
    pub async fn sweep_workspaces(&self) -> Result<usize, PipelineError> {
        let mut removed = 0;
        for job_id in self.workspaces.job_dirs().await? {
            if self.workspaces.is_held(&job_id) {
                continue;
            }
            let orphaned = match self.collaborators.jobs.get(&job_id).await {
                Ok(job) => job.status.is_terminal(),
                Err(StoreError::NotFound(_)) => true,
                Err(e) => return Err(e.into()),
            };
            if orphaned {
                self.workspaces.release_by_id(&job_id).await?;
                info!(job_id = %job_id, "removed leftover workspace");
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn execute(
        &self,
        job: &AnalysisJob,
        workspace: &mut Option<Workspace>,
    ) -> Result<AnalysisResult, PipelineError> {
        let source = self.collaborators.files.fetch(&job.file_ref).await?;
        let report = self.validate(source.clone(), job.encoding).await?;

        self.advance(&job.id, 20, "preparing workspace").await?;
        let ws = workspace.insert(self.workspaces.acquire(&job.id, &source).await?);

        self.advance(&job.id, 50, "running engine").await?;
        let output = self.engine.run(ws, &job.settings).await?;
        info!(
            job_id = %job.id,
            elapsed_ms = output.elapsed.as_millis() as u64,
            "engine finished"
        );

        self.advance(&job.id, 80, "parsing metrics").await?;
        let mesh = ws.input_path();
        let material = job.settings.material_type;
        tokio::task::spawn_blocking(move || {
            collect_metrics(&output.artifact, &mesh, &report, material)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("metrics task failed: {e}")))
    }

    async fn validate(
        &self,
        path: PathBuf,
        encoding: Option<GeometryEncoding>,
    ) -> Result<GeometryReport, PipelineError> {
        let validator = self.validator.clone();
        let report = tokio::task::spawn_blocking(move || validator.validate(&path, encoding))
            .await
            .map_err(|e| PipelineError::Internal(format!("validation task failed: {e}")))??;
        Ok(report)
    }

    async fn persist(
        &self,
        job: &AnalysisJob,
        metrics: AnalysisResult,
    ) -> Result<String, PipelineError> {
        let result_ref = self
            .collaborators
            .results
            .save(NewResult {
                job_id: job.id.clone(),
                file_ref: job.file_ref.clone(),
                settings: job.settings.clone(),
                metrics,
            })
            .await?;
        Ok(result_ref)
    }

    async fn advance(&self, job_id: &str, progress: u8, message: &str) -> Result<(), PipelineError> {
        info!(job_id, progress, stage = message, "stage started");
        let current = self.collaborators.jobs.get(job_id).await?.progress;
        self.transition(job_id, JobTransition::progress(progress.max(current), message))
            .await?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, cause: PipelineError) -> ProcessOutcome {
        let job_error = cause.to_job_error();
        warn!(job_id, kind = ?job_error.kind, error = %cause, "job failed");
        if let PipelineError::Engine(EngineError::Failed { diagnostic, .. }) = &cause {
            warn!(job_id, diagnostic = %diagnostic, "engine diagnostic");
        }
        if let Err(e) = self.transition(job_id, JobTransition::Fail(job_error.clone())).await {
            error!(job_id, error = %e, "failed to record job failure");
        }
        ProcessOutcome::Failed(job_error)
    }

    /// Apply a transition and publish the committed state.
    async fn transition(
        &self,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<AnalysisJob, StoreError> {
        let job = self.collaborators.jobs.update(job_id, transition).await?;
        self.collaborators.events.publish(ProgressEvent::from(&job));
        Ok(job)
    }
}
