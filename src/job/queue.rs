use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
    #[error("job queue backend error: {0}")]
    Backend(String),
}

/// Dispatch of job ids to workers. Delivery is at-least-once, so consumers
/// must tolerate seeing the same id more than once.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError>;

    /// Wait for the next job id. `None` once the queue is closed and drained.
    async fn dequeue(&self) -> Option<String>;
}

/// Unbounded in-process queue shared by every worker.
pub struct InMemoryJobQueue {
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    receiver: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: std::sync::Mutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
        }
    }

    /// Stop accepting new ids. Already queued ids are still delivered, then
    /// `dequeue` returns `None`.
    pub fn close(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if sender.is_some() {
            debug!("job queue closed");
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender
                .send(job_id.to_string())
                .map_err(|_| QueueError::Closed),
            None => Err(QueueError::Closed),
        }
    }

    async fn dequeue(&self) -> Option<String> {
        self.receiver.lock().await.recv().await
    }
}
