use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use super::models::{AnalysisJob, JobStatus};

const DEFAULT_CAPACITY: usize = 256;

/// One progress notification for a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
}

impl From<&AnalysisJob> for ProgressEvent {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
        }
    }
}

/// Best-effort event sink. `publish` must return immediately.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Fans events out over a broadcast channel. Slow subscribers lag and miss
/// events; publishing never waits for them.
pub struct BroadcastProgressSink {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastProgressSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressSink for BroadcastProgressSink {
    fn publish(&self, event: ProgressEvent) {
        // no subscribers is not an error
        if self.sender.send(event).is_err() {
            trace!("progress event dropped, no subscribers");
        }
    }
}
