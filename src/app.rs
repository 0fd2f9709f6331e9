//! Wires configuration to concrete collaborators.

use sqlx::{Pool, Postgres};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::db::{self, PgJobQueue, PgJobStore, PgResultStore};
use crate::files::LocalFileSource;
use crate::geometry::GeometryValidator;
use crate::job::{BroadcastProgressSink, InMemoryJobQueue, InMemoryJobStore, InMemoryResultStore};
use crate::pipeline::{AnalysisPipeline, AnalysisService, Collaborators};
use crate::slicer::{PrusaSlicerRunner, SlicingEngine};
use crate::workspace::WorkspaceManager;

const QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("failed to prepare {what}: {source}")]
    Io {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a host needs to accept and execute jobs.
pub struct Runtime {
    pub service: AnalysisService,
    pub pipeline: Arc<AnalysisPipeline>,
    pub collaborators: Collaborators,
    pub events: Arc<BroadcastProgressSink>,
    pub pool: Option<Pool<Postgres>>,
}

/// In-memory collaborators serving files from `upload_dir`.
pub fn in_memory(
    upload_dir: impl Into<std::path::PathBuf>,
    events: Arc<BroadcastProgressSink>,
) -> Collaborators {
    Collaborators {
        jobs: Arc::new(InMemoryJobStore::new()),
        queue: Arc::new(InMemoryJobQueue::new()),
        files: Arc::new(LocalFileSource::new(upload_dir)),
        results: Arc::new(InMemoryResultStore::new()),
        events,
    }
}

/// Postgres-backed collaborators. Migrations are applied first.
pub async fn postgres(
    config: &Config,
    database_url: &str,
    events: Arc<BroadcastProgressSink>,
) -> Result<(Collaborators, Pool<Postgres>), StartupError> {
    let pool = db::connection::get_connection(database_url, config.max_db_connections).await?;
    info!("Database connection pool established");
    db::migrations::run_migrations(&pool).await?;

    let collaborators = Collaborators {
        jobs: Arc::new(PgJobStore::new(pool.clone())),
        queue: Arc::new(PgJobQueue::new(
            pool.clone(),
            QUEUE_POLL_INTERVAL,
            config.job_lease,
        )),
        files: Arc::new(LocalFileSource::new(&config.upload_dir)),
        results: Arc::new(PgResultStore::new(pool.clone())),
        events,
    };
    Ok((collaborators, pool))
}

/// Build the runtime described by `config`, using Postgres when
/// `DATABASE_URL` is set.
pub async fn build(config: &Config) -> Result<Runtime, StartupError> {
    std::fs::create_dir_all(&config.workspace_root).map_err(|source| StartupError::Io {
        what: "workspace root",
        source,
    })?;

    let events = Arc::new(BroadcastProgressSink::default());
    let (collaborators, pool) = match &config.database_url {
        Some(url) => {
            let (collaborators, pool) = postgres(config, url, events.clone()).await?;
            (collaborators, Some(pool))
        }
        None => {
            info!("DATABASE_URL not set, keeping jobs and results in memory");
            (in_memory(&config.upload_dir, events.clone()), None)
        }
    };

    let engine: Arc<dyn SlicingEngine> = Arc::new(PrusaSlicerRunner::new(config.runner_config()));
    Ok(assemble(
        collaborators,
        GeometryValidator::new(config.validator_limits()),
        WorkspaceManager::new(&config.workspace_root),
        engine,
        events,
        pool,
        config.job_lease,
    ))
}

pub fn assemble(
    collaborators: Collaborators,
    validator: GeometryValidator,
    workspaces: WorkspaceManager,
    engine: Arc<dyn SlicingEngine>,
    events: Arc<BroadcastProgressSink>,
    pool: Option<Pool<Postgres>>,
    lease: Duration,
) -> Runtime {
    let service = AnalysisService::new(collaborators.clone(), validator.clone());
    let pipeline = Arc::new(
        AnalysisPipeline::new(collaborators.clone(), validator, workspaces, engine)
            .with_lease(lease),
    );
    Runtime {
        service,
        pipeline,
        collaborators,
        events,
        pool,
    }
}
