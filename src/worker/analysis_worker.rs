use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::job::JobQueue;
use crate::pipeline::{AnalysisPipeline, ProcessOutcome};

/// Background worker pulling analysis jobs off the queue
pub struct AnalysisWorker {
    pipeline: Arc<AnalysisPipeline>,
    queue: Arc<dyn JobQueue>,
}

impl AnalysisWorker {
    pub fn new(pipeline: Arc<AnalysisPipeline>, queue: Arc<dyn JobQueue>) -> Self {
        Self { pipeline, queue }
    }

    /// Run worker with semaphore-based bounded concurrency
    ///
    /// # Architecture
    /// - Acquires a semaphore permit before taking a job, so jobs wait in
    ///   the queue rather than in the worker while the pool is saturated
    /// - Dequeues a job id and spawns its pipeline run; the permit is held
    ///   until the run reaches a terminal state
    /// - Stops taking jobs once shutdown is signalled or the queue closes
    /// - Waits for every in-flight job before returning
    ///
    /// # Arguments
    /// - `worker_id` - Identifier for this worker instance
    /// - `semaphore` - Shared by all workers; caps concurrent engine runs
    /// - `shutdown_rx` - Flips to `true` when the process is stopping
    pub async fn run(
        &self,
        worker_id: usize,
        semaphore: Arc<Semaphore>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(worker_id, "worker started");
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(finished) = in_flight.try_join_next() {
                report(worker_id, finished);
            }
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(worker_id, error = %e, "semaphore closed");
                        break;
                    }
                },
            };

            let job_id = tokio::select! {
                _ = shutdown_rx.changed() => break,
                next = self.queue.dequeue() => match next {
                    Some(job_id) => job_id,
                    None => {
                        info!(worker_id, "job queue closed");
                        break;
                    }
                },
            };

            debug!(worker_id, job_id = %job_id, "job dequeued");
            let pipeline = self.pipeline.clone();
            in_flight.spawn(async move {
                let outcome = pipeline.process(&job_id).await;
                drop(permit);
                (job_id, outcome)
            });
        }

        if !in_flight.is_empty() {
            info!(worker_id, in_flight = in_flight.len(), "waiting for in-flight jobs");
        }
        while let Some(finished) = in_flight.join_next().await {
            report(worker_id, finished);
        }
        info!(worker_id, "worker stopped");
    }
}

fn report(
    worker_id: usize,
    finished: Result<(String, ProcessOutcome), tokio::task::JoinError>,
) {
    match finished {
        Ok((job_id, ProcessOutcome::Completed { result_ref })) => {
            info!(worker_id, job_id = %job_id, result_ref = %result_ref, "job finished")
        }
        Ok((job_id, ProcessOutcome::Failed(e))) => {
            info!(worker_id, job_id = %job_id, kind = ?e.kind, "job finished with failure")
        }
        Ok((job_id, ProcessOutcome::Skipped)) => {
            debug!(worker_id, job_id = %job_id, "delivery skipped")
        }
        Err(e) => error!(worker_id, error = %e, "job task panicked"),
    }
}
