pub mod analysis_worker;

pub use analysis_worker::AnalysisWorker;

use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::info;

use crate::job::JobQueue;
use crate::pipeline::AnalysisPipeline;

/// Spawn `num_workers` workers sharing one semaphore of
/// `max_concurrent_jobs` permits.
pub fn spawn_workers(
    num_workers: usize,
    max_concurrent_jobs: usize,
    pipeline: Arc<AnalysisPipeline>,
    queue: Arc<dyn JobQueue>,
    shutdown_rx: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_jobs));
    (1..=num_workers)
        .map(|worker_id| {
            let worker = AnalysisWorker::new(pipeline.clone(), queue.clone());
            let semaphore = semaphore.clone();
            let shutdown_rx = shutdown_rx.clone();
            let handle = tokio::spawn(async move {
                worker.run(worker_id, semaphore, shutdown_rx).await;
            });
            info!("Spawned worker {}", worker_id);
            handle
        })
        .collect()
}
