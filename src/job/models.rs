use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::geometry::GeometryEncoding;
use crate::slicer::PrintSettings;

/// Job status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Failure category recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    ValidationRejected,
    EngineError,
    Timeout,
    MissingOutput,
    WorkspaceError,
    FileSourceError,
    PersistenceError,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A single state change applied atomically to a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum JobTransition {
    /// PENDING -> PROCESSING. Fails for any other starting state, which is
    /// how redelivered jobs are recognised.
    Start,
    /// PROCESSING -> PROCESSING for a redelivered job whose owner has not
    /// touched it for `lease`. Progress is kept.
    Reclaim { lease: Duration },
    Progress { progress: u8, message: String },
    Complete { result_ref: String },
    Fail(JobError),
}

impl JobTransition {
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        JobTransition::Progress {
            progress,
            message: message.into(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            JobTransition::Start => "start",
            JobTransition::Reclaim { .. } => "reclaim",
            JobTransition::Progress { .. } => "report progress",
            JobTransition::Complete { .. } => "complete",
            JobTransition::Fail(_) => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {job_id} is {status}; cannot {attempted}")]
    IllegalState {
        job_id: String,
        status: JobStatus,
        attempted: &'static str,
    },
    #[error("job {job_id} progress cannot go from {from} to {to}")]
    ProgressRegression { job_id: String, from: u8, to: u8 },
    #[error("job {job_id} is still owned (last update {updated_at})")]
    LeaseActive {
        job_id: String,
        updated_at: DateTime<Utc>,
    },
}

/// Latest `updated_at` at which a job counts as abandoned at `now`.
pub fn lease_cutoff(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// One request to analyse one mesh with one settings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub file_ref: String,
    pub encoding: Option<GeometryEncoding>,
    pub settings: PrintSettings,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub result_ref: Option<String>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Time of the last applied transition. Owners refresh it at every stage.
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(
        id: impl Into<String>,
        file_ref: impl Into<String>,
        encoding: Option<GeometryEncoding>,
        settings: PrintSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            file_ref: file_ref.into(),
            encoding,
            settings,
            status: JobStatus::Pending,
            progress: 0,
            message: "queued".to_string(),
            result_ref: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// True when nobody has advanced the job within `lease` of `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        self.updated_at <= lease_cutoff(now, lease)
    }

    fn illegal(&self, transition: &JobTransition) -> TransitionError {
        TransitionError::IllegalState {
            job_id: self.id.clone(),
            status: self.status,
            attempted: transition.name(),
        }
    }

    /// Apply `transition`, enforcing the state machine. On error the job is
    /// left untouched.
    pub fn apply(&mut self, transition: JobTransition) -> Result<(), TransitionError> {
        match (self.status, &transition) {
            (JobStatus::Pending, JobTransition::Start) => {
                self.status = JobStatus::Processing;
                self.progress = 0;
                self.message = "validating".to_string();
                self.started_at = Some(Utc::now());
            }
            (JobStatus::Processing, JobTransition::Reclaim { lease }) => {
                if !self.lease_expired(Utc::now(), *lease) {
                    return Err(TransitionError::LeaseActive {
                        job_id: self.id.clone(),
                        updated_at: self.updated_at,
                    });
                }
                self.message = "resuming interrupted analysis".to_string();
            }
            (JobStatus::Processing, JobTransition::Progress { progress, message }) => {
                if *progress < self.progress || *progress > 100 {
                    return Err(TransitionError::ProgressRegression {
                        job_id: self.id.clone(),
                        from: self.progress,
                        to: *progress,
                    });
                }
                self.progress = *progress;
                self.message = message.clone();
            }
            (JobStatus::Processing, JobTransition::Complete { result_ref }) => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.message = "completed".to_string();
                self.result_ref = Some(result_ref.clone());
                self.completed_at = Some(Utc::now());
            }
            (JobStatus::Pending | JobStatus::Processing, JobTransition::Fail(error)) => {
                self.status = JobStatus::Failed;
                self.message = error.message.clone();
                self.error = Some(error.clone());
                self.completed_at = Some(Utc::now());
            }
            _ => return Err(self.illegal(&transition)),
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            result_ref: self.result_ref.clone(),
            error: self.error.clone(),
        }
    }
}

/// Read-only status snapshot returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> AnalysisJob {
        AnalysisJob::new("job-1", "model.stl", None, PrintSettings::default())
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut job = job();
        job.apply(JobTransition::Start).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        job.apply(JobTransition::progress(20, "preparing workspace")).unwrap();
        job.apply(JobTransition::progress(50, "running engine")).unwrap();
        job.apply(JobTransition::Complete {
            result_ref: "r-1".into(),
        })
        .unwrap();

        let view = job.view();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 100);
        assert_eq!(view.result_ref.as_deref(), Some("r-1"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn second_start_is_rejected() {
        let mut job = job();
        job.apply(JobTransition::Start).unwrap();
        let err = job.apply(JobTransition::Start).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::IllegalState {
                status: JobStatus::Processing,
                ..
            }
        ));
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = job();
        job.apply(JobTransition::Start).unwrap();
        job.apply(JobTransition::progress(50, "running engine")).unwrap();
        let before = job.clone();
        assert!(job.apply(JobTransition::progress(20, "back")).is_err());
        assert_eq!(job, before);
    }

    #[test]
    fn failure_keeps_progress_and_terminal_states_are_final() {
        let mut job = job();
        job.apply(JobTransition::Start).unwrap();
        job.apply(JobTransition::progress(50, "running engine")).unwrap();
        job.apply(JobTransition::Fail(JobError::new(JobErrorKind::Timeout, "too slow")))
            .unwrap();
        assert_eq!(job.progress, 50);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message, "too slow");

        for next in [
            JobTransition::Start,
            JobTransition::progress(60, "x"),
            JobTransition::Complete { result_ref: "r".into() },
            JobTransition::Fail(JobError::new(JobErrorKind::EngineError, "again")),
        ] {
            assert!(job.apply(next).is_err());
        }
    }

    #[test]
    fn reclaim_needs_an_expired_lease() {
        let mut job = job();
        assert!(job.apply(JobTransition::Reclaim { lease: Duration::ZERO }).is_err());

        job.apply(JobTransition::Start).unwrap();
        job.apply(JobTransition::progress(50, "running engine")).unwrap();
        let err = job
            .apply(JobTransition::Reclaim {
                lease: Duration::from_secs(3600),
            })
            .unwrap_err();
        assert!(matches!(err, TransitionError::LeaseActive { .. }));

        job.updated_at -= chrono::Duration::seconds(7200);
        let stale = job.updated_at;
        job.apply(JobTransition::Reclaim {
            lease: Duration::from_secs(3600),
        })
        .unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 50);
        assert!(job.updated_at > stale);
    }

    #[test]
    fn lease_cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(lease_cutoff(now, Duration::ZERO), now);
        assert_eq!(
            lease_cutoff(now, Duration::from_secs(90)),
            now - chrono::Duration::seconds(90)
        );
        assert_eq!(lease_cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn pending_cannot_complete() {
        let mut job = job();
        assert!(job
            .apply(JobTransition::Complete { result_ref: "r".into() })
            .is_err());
    }
}
