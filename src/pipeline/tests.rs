use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

use super::*;
use crate::files::LocalFileSource;
use crate::geometry::fixtures;
use crate::job::{
    BroadcastProgressSink, InMemoryJobQueue, InMemoryJobStore, InMemoryResultStore, JobStatus,
    JobStore, ResultStore, ResultStoreError, StoreError, StoredResult,
};
use crate::slicer::{EngineOutput, PrintSettings};

const GCODE: &str = "\
G28
; filament used [mm] = 2500.0
; estimated printing time (normal mode) = 1h 30m 45s
";

#[derive(Debug, Clone, Copy)]
enum Script {
    Succeed,
    Fail,
    Timeout,
    NoOutput,
}

/// Stand-in engine that records the workspaces it was handed.
struct MockEngine {
    script: Script,
    runs: AtomicUsize,
    seen: Mutex<Vec<PathBuf>>,
}

impl MockEngine {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            runs: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SlicingEngine for MockEngine {
    async fn run(
        &self,
        workspace: &Workspace,
        _settings: &PrintSettings,
    ) -> Result<EngineOutput, EngineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        assert!(workspace.input_path().is_file(), "engine ran without an input mesh");
        self.seen.lock().unwrap().push(workspace.path().to_path_buf());

        match self.script {
            Script::Succeed => {
                tokio::fs::write(workspace.output_path(), GCODE)
                    .await
                    .map_err(EngineError::Io)?;
                Ok(EngineOutput {
                    artifact: workspace.output_path(),
                    elapsed: Duration::from_millis(5),
                })
            }
            Script::Fail => Err(EngineError::Failed {
                status: "exit status: 1".into(),
                diagnostic: "Object too large for the print bed".into(),
            }),
            Script::Timeout => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(EngineError::Timeout(Duration::from_millis(20)))
            }
            Script::NoOutput => Err(EngineError::MissingOutput(workspace.output_path())),
        }
    }
}

struct BrokenResultStore;

#[async_trait]
impl ResultStore for BrokenResultStore {
    async fn save(&self, _result: NewResult) -> Result<String, ResultStoreError> {
        Err(ResultStoreError::Backend("disk full".into()))
    }

    async fn get(&self, result_id: &str) -> Result<StoredResult, ResultStoreError> {
        Err(ResultStoreError::NotFound(result_id.into()))
    }

    async fn discard(&self, _result_id: &str) -> Result<(), ResultStoreError> {
        Ok(())
    }
}

/// Job store whose COMPLETED write always fails.
struct RefusingCompleteStore {
    inner: Arc<InMemoryJobStore>,
}

#[async_trait]
impl JobStore for RefusingCompleteStore {
    async fn insert(&self, job: AnalysisJob) -> Result<(), StoreError> {
        self.inner.insert(job).await
    }

    async fn get(&self, job_id: &str) -> Result<AnalysisJob, StoreError> {
        self.inner.get(job_id).await
    }

    async fn update(
        &self,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<AnalysisJob, StoreError> {
        if matches!(transition, JobTransition::Complete { .. }) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.update(job_id, transition).await
    }
}

#[derive(Default)]
struct HarnessOptions {
    results: Option<Arc<dyn ResultStore>>,
    workspace_root: Option<PathBuf>,
    refuse_complete: bool,
    lease: Option<Duration>,
}

struct Harness {
    dir: TempDir,
    jobs: Arc<InMemoryJobStore>,
    queue: Arc<InMemoryJobQueue>,
    results: Arc<InMemoryResultStore>,
    events: Arc<BroadcastProgressSink>,
    service: AnalysisService,
    pipeline: AnalysisPipeline,
}

impl Harness {
    fn new(engine: Arc<dyn SlicingEngine>) -> Self {
        Self::build(engine, HarnessOptions::default())
    }

    fn build(engine: Arc<dyn SlicingEngine>, options: HarnessOptions) -> Self {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();

        let jobs = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let results = Arc::new(InMemoryResultStore::new());
        let events = Arc::new(BroadcastProgressSink::default());

        let result_store: Arc<dyn ResultStore> = match options.results {
            Some(store) => store,
            None => results.clone(),
        };
        let job_store: Arc<dyn JobStore> = if options.refuse_complete {
            Arc::new(RefusingCompleteStore {
                inner: jobs.clone(),
            })
        } else {
            jobs.clone()
        };
        let collaborators = Collaborators {
            jobs: job_store,
            queue: queue.clone(),
            files: Arc::new(LocalFileSource::new(&uploads)),
            results: result_store,
            events: events.clone(),
        };
        let workspaces = WorkspaceManager::new(
            options
                .workspace_root
                .unwrap_or_else(|| dir.path().join("workspaces")),
        );
        let validator = GeometryValidator::default();

        let service = AnalysisService::new(collaborators.clone(), validator.clone());
        let mut pipeline = AnalysisPipeline::new(collaborators, validator, workspaces, engine);
        if let Some(lease) = options.lease {
            pipeline = pipeline.with_lease(lease);
        }

        Self {
            dir,
            jobs,
            queue,
            results,
            events,
            service,
            pipeline,
        }
    }

    fn upload(&self, name: &str, bytes: &[u8]) -> String {
        std::fs::write(self.dir.path().join("uploads").join(name), bytes).unwrap();
        name.to_string()
    }

    fn upload_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("uploads").join(name)
    }

    async fn submit(&self, file_ref: &str, job_id: &str) -> String {
        self.service
            .submit(AnalysisRequest::new(file_ref, PrintSettings::default()).with_job_id(job_id))
            .await
            .unwrap()
    }

    /// Dequeue the next delivery and run it.
    async fn run_next(&self) -> ProcessOutcome {
        let job_id = self.queue.dequeue().await.unwrap();
        self.pipeline.process(&job_id).await
    }

    fn workspace_exists(&self, job_id: &str) -> bool {
        self.pipeline.workspaces().path_for(job_id).exists()
    }

    fn assert_no_leak(&self, job_id: &str) {
        assert!(!self.workspace_exists(job_id), "workspace for {job_id} leaked");
        assert!(!self.pipeline.workspaces().is_held(job_id));
    }
}

fn drain(rx: &mut broadcast::Receiver<ProgressEvent>, job_id: &str) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.job_id == job_id {
            events.push(event);
        }
    }
    events
}

#[tokio::test]
async fn well_formed_mesh_completes_with_metrics() {
    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone());
    let mut rx = h.events.subscribe();
    let file_ref = h.upload("part.stl", &fixtures::binary_mesh(1000));

    let job_id = h.submit(&file_ref, "job-ok").await;
    assert_eq!(h.service.status(&job_id).await.unwrap().status, JobStatus::Pending);

    let result_ref = match h.run_next().await {
        ProcessOutcome::Completed { result_ref } => result_ref,
        other => panic!("expected completion, got {other:?}"),
    };

    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress, 100);
    assert_eq!(view.result_ref.as_deref(), Some(result_ref.as_str()));
    assert!(view.error.is_none());

    let stored = h.service.result(&result_ref).await.unwrap();
    assert_eq!(stored.job_id, job_id);
    assert!(stored.metrics.filament_grams > 0.0);
    assert!((stored.metrics.print_time_hours - 1.5125).abs() < 1e-9);
    assert!((0.0..=crate::metrics::MAX_COMPLEXITY).contains(&stored.metrics.complexity_score));
    assert_eq!(stored.metrics.triangle_count, 1000);
    assert_eq!(h.results.len().await, 1);

    let statuses: Vec<JobStatus> = drain(&mut rx, &job_id).iter().map(|e| e.status).collect();
    assert_eq!(statuses.first(), Some(&JobStatus::Pending));
    assert!(statuses.contains(&JobStatus::Processing));
    assert_eq!(statuses.last(), Some(&JobStatus::Completed));

    assert_eq!(engine.runs(), 1);
    h.assert_no_leak(&job_id);
}

#[tokio::test]
async fn progress_is_non_decreasing() {
    let h = Harness::new(MockEngine::new(Script::Succeed));
    let mut rx = h.events.subscribe();
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-progress").await;
    h.run_next().await;

    let events = drain(&mut rx, &job_id);
    let progress: Vec<u8> = events.iter().map(|e| e.progress).collect();
    assert_eq!(progress, vec![0u8, 0, 20, 50, 80, 100]);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        &messages[1..5],
        &["validating", "preparing workspace", "running engine", "parsing metrics"]
    );
}

#[tokio::test]
async fn truncated_mesh_is_rejected_before_any_job_exists() {
    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone());
    let mut bytes = fixtures::binary_mesh(500);
    bytes.truncate(bytes.len() - 10);
    let file_ref = h.upload("short.stl", &bytes);

    let err = h
        .service
        .submit(AnalysisRequest::new(&file_ref, PrintSettings::default()).with_job_id("job-short"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Rejected(GeometryRejection::SizeMismatch { .. })
    ));
    assert!(h.jobs.is_empty().await);
    assert!(matches!(
        h.service.status("job-short").await,
        Err(ServiceError::JobNotFound(_))
    ));
    assert!(!h.workspace_exists("job-short"));
    assert_eq!(engine.runs(), 0);
}

#[tokio::test]
async fn invalid_settings_and_ids_are_rejected_synchronously() {
    let h = Harness::new(MockEngine::new(Script::Succeed));
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(5.0));

    let mut settings = PrintSettings::default();
    settings.layer_height = 0.9;
    let err = h
        .service
        .submit(AnalysisRequest::new(&file_ref, settings))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Invalid(_)));

    let err = h
        .service
        .submit(AnalysisRequest::new(&file_ref, PrintSettings::default()).with_job_id("../escape"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidJobId(_)));

    let err = h
        .service
        .submit(AnalysisRequest::new("missing.stl", PrintSettings::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::File(FileSourceError::NotFound(_))));
    assert!(h.jobs.is_empty().await);
}

#[tokio::test]
async fn generated_ids_are_unique_and_duplicates_conflict() {
    let h = Harness::new(MockEngine::new(Script::Succeed));
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(5.0));

    let a = h
        .service
        .submit(AnalysisRequest::new(&file_ref, PrintSettings::default()))
        .await
        .unwrap();
    let b = h
        .service
        .submit(AnalysisRequest::new(&file_ref, PrintSettings::default()))
        .await
        .unwrap();
    assert_ne!(a, b);

    h.submit(&file_ref, "fixed").await;
    let err = h
        .service
        .submit(AnalysisRequest::new(&file_ref, PrintSettings::default()).with_job_id("fixed"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Duplicate(id) if id == "fixed"));
}

#[tokio::test]
async fn engine_timeout_fails_job_and_releases_workspace() {
    let engine = MockEngine::new(Script::Timeout);
    let h = Harness::new(engine.clone());
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-timeout").await;

    let outcome = h.run_next().await;
    assert!(matches!(&outcome, ProcessOutcome::Failed(e) if e.kind == JobErrorKind::Timeout));

    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.progress, 50);
    assert_eq!(view.error.map(|e| e.kind), Some(JobErrorKind::Timeout));
    assert!(view.result_ref.is_none());
    assert!(h.results.is_empty().await);

    assert_eq!(engine.seen(), vec![h.pipeline.workspaces().path_for(&job_id)]);
    h.assert_no_leak(&job_id);
}

#[tokio::test]
async fn engine_failures_map_to_error_kinds() {
    for (script, kind) in [
        (Script::Fail, JobErrorKind::EngineError),
        (Script::NoOutput, JobErrorKind::MissingOutput),
    ] {
        let h = Harness::new(MockEngine::new(script));
        let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
        let job_id = h.submit(&file_ref, "job-engine").await;

        h.run_next().await;
        let view = h.service.status(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        let error = view.error.unwrap();
        assert_eq!(error.kind, kind);
        if kind == JobErrorKind::EngineError {
            assert!(error.message.contains("Object too large"));
        }
        h.assert_no_leak(&job_id);
    }
}

#[tokio::test]
async fn mesh_replaced_after_submit_fails_validation_without_workspace() {
    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone());
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-swapped").await;
    h.upload("part.stl", &[0u8; 90]);

    h.run_next().await;
    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.progress, 0);
    assert_eq!(view.error.map(|e| e.kind), Some(JobErrorKind::ValidationRejected));
    assert_eq!(engine.runs(), 0);
    h.assert_no_leak(&job_id);
}

#[tokio::test]
async fn mesh_removed_after_submit_is_a_file_source_error() {
    let h = Harness::new(MockEngine::new(Script::Succeed));
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-gone").await;
    std::fs::remove_file(h.upload_path("part.stl")).unwrap();

    h.run_next().await;
    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.error.map(|e| e.kind), Some(JobErrorKind::FileSourceError));
    h.assert_no_leak(&job_id);
}

#[tokio::test]
async fn unusable_workspace_root_is_a_workspace_error() {
    let blocker = TempDir::new().unwrap();
    let root = blocker.path().join("not-a-directory");
    std::fs::write(&root, b"file").unwrap();

    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::build(
        engine.clone(),
        HarnessOptions {
            workspace_root: Some(root),
            ..Default::default()
        },
    );
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-ws").await;

    h.run_next().await;
    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.progress, 20);
    assert_eq!(view.error.map(|e| e.kind), Some(JobErrorKind::WorkspaceError));
    assert_eq!(engine.runs(), 0);
    assert!(!h.pipeline.workspaces().is_held(&job_id));
}

#[tokio::test]
async fn result_persistence_failure_fails_job_after_cleanup() {
    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::build(
        engine.clone(),
        HarnessOptions {
            results: Some(Arc::new(BrokenResultStore)),
            ..Default::default()
        },
    );
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-persist").await;

    h.run_next().await;
    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.map(|e| e.kind), Some(JobErrorKind::PersistenceError));
    assert!(view.result_ref.is_none());
    h.assert_no_leak(&job_id);
}

#[tokio::test]
async fn redelivered_job_runs_once() {
    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone());
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-twice").await;
    h.queue.enqueue(&job_id).await.unwrap();

    let first = h.queue.dequeue().await.unwrap();
    let second = h.queue.dequeue().await.unwrap();
    let (a, b) = tokio::join!(h.pipeline.process(&first), h.pipeline.process(&second));

    let completed = [&a, &b]
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::Completed { .. }))
        .count();
    let skipped = [&a, &b]
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::Skipped))
        .count();
    assert_eq!((completed, skipped), (1, 1));
    assert_eq!(engine.runs(), 1);
    assert_eq!(h.results.len().await, 1);

    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    h.assert_no_leak(&job_id);

    // a late redelivery after completion leaves the record alone
    h.queue.enqueue(&job_id).await.unwrap();
    assert_eq!(h.run_next().await, ProcessOutcome::Skipped);
    assert_eq!(h.service.status(&job_id).await.unwrap(), view);
}

#[tokio::test]
async fn failed_completion_write_discards_the_saved_result() {
    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::build(
        engine.clone(),
        HarnessOptions {
            refuse_complete: true,
            ..Default::default()
        },
    );
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-orphan").await;

    let outcome = h.run_next().await;
    assert!(matches!(
        outcome,
        ProcessOutcome::Failed(JobError { kind: JobErrorKind::PersistenceError, .. })
    ));
    assert_eq!(engine.runs(), 1);
    assert!(h.results.is_empty().await);

    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.result_ref.is_none());
    h.assert_no_leak(&job_id);
}

/// Leaves `job_id` the way a worker killed mid-run would: PROCESSING with a
/// half-written workspace and the delivery already taken off the queue.
async fn abandon_mid_run(h: &Harness, job_id: &str) {
    assert_eq!(h.queue.dequeue().await.unwrap(), job_id);
    h.jobs.update(job_id, JobTransition::Start).await.unwrap();
    h.jobs
        .update(job_id, JobTransition::progress(50, "running engine"))
        .await
        .unwrap();
    let leftover = h.pipeline.workspaces().path_for(job_id);
    std::fs::create_dir_all(&leftover).unwrap();
    std::fs::write(leftover.join(crate::workspace::OUTPUT_FILE), b"partial").unwrap();
}

#[tokio::test]
async fn job_abandoned_by_a_crashed_worker_is_reclaimed() {
    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::build(
        engine.clone(),
        HarnessOptions {
            lease: Some(Duration::ZERO),
            ..Default::default()
        },
    );
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-crashed").await;
    abandon_mid_run(&h, &job_id).await;

    h.queue.enqueue(&job_id).await.unwrap();
    let outcome = h.run_next().await;
    assert!(matches!(outcome, ProcessOutcome::Completed { .. }), "{outcome:?}");
    assert_eq!(engine.runs(), 1);
    assert_eq!(h.results.len().await, 1);

    let view = h.service.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress, 100);
    h.assert_no_leak(&job_id);
}

#[tokio::test]
async fn job_within_its_lease_is_not_reclaimed() {
    let engine = MockEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone());
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-leased").await;
    abandon_mid_run(&h, &job_id).await;

    h.queue.enqueue(&job_id).await.unwrap();
    assert_eq!(h.run_next().await, ProcessOutcome::Skipped);
    assert_eq!(engine.runs(), 0);
    assert_eq!(
        h.service.status(&job_id).await.unwrap().status,
        JobStatus::Processing
    );
}

#[tokio::test]
async fn sweep_removes_workspaces_of_finished_or_unknown_jobs() {
    let h = Harness::new(MockEngine::new(Script::Succeed));
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));

    let done = h.submit(&file_ref, "job-done").await;
    h.run_next().await;
    let running = h.submit(&file_ref, "job-running").await;
    abandon_mid_run(&h, &running).await;

    let workspaces = h.pipeline.workspaces();
    for job_id in [done.as_str(), "job-unknown"] {
        std::fs::create_dir_all(workspaces.path_for(job_id)).unwrap();
    }

    assert_eq!(h.pipeline.sweep_workspaces().await.unwrap(), 2);
    h.assert_no_leak(&done);
    h.assert_no_leak("job-unknown");
    assert!(h.workspace_exists(&running));
}

#[tokio::test]
async fn await_terminal_reports_still_running() {
    let h = Harness::new(MockEngine::new(Script::Succeed));
    let file_ref = h.upload("part.stl", &fixtures::binary_cube(10.0));
    let job_id = h.submit(&file_ref, "job-wait").await;

    let err = h
        .service
        .await_terminal(&job_id, Duration::from_millis(60))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::StillRunning(_)));

    h.run_next().await;
    let view = h
        .service
        .await_terminal(&job_id, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(view.status, JobStatus::Completed);
}

#[cfg(unix)]
#[tokio::test]
async fn local_engine_script_runs_end_to_end() {
    use crate::slicer::{EngineMode, PrusaSlicerRunner, RunnerConfig};

    let scripts = TempDir::new().unwrap();
    let script = scripts.path().join("slicer.sh");
    std::fs::write(
        &script,
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift ;;
  esac
  shift
done
printf '; filament used [mm] = 1200\n; estimated printing time (normal mode) = 45m 30s\n; support_material = 1\n' > "$out"
"#,
    )
    .unwrap();
    let runner = PrusaSlicerRunner::new(RunnerConfig {
        mode: EngineMode::Local {
            program: Path::new("/bin/sh").to_path_buf(),
            args: vec![script.display().to_string()],
        },
        timeout: Duration::from_secs(10),
    });

    let h = Harness::new(Arc::new(runner));
    let file_ref = h.upload("cube.stl", fixtures::ascii_cube(20.0).as_bytes());
    let job_id = h.submit(&file_ref, "job-local").await;

    let ProcessOutcome::Completed { result_ref } = h.run_next().await else {
        panic!("local engine run did not complete");
    };
    let stored = h.service.result(&result_ref).await.unwrap();
    assert!(stored.metrics.supports_required);
    assert!((stored.metrics.print_time_hours - (45.0 / 60.0 + 30.0 / 3600.0)).abs() < 1e-9);
    assert!((stored.metrics.volume_mm3 - 8000.0).abs() < 1e-3);
    h.assert_no_leak(&job_id);
}
