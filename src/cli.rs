//! Command-line surface of the `stl-analysis` binary.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::api::analysis::dto::ResultResponse;
use crate::app::{self, StartupError};
use crate::config::Config;
use crate::db;
use crate::geometry::{GeometryEncoding, GeometryRejection, GeometryReport, GeometryValidator, ValidatorLimits};
use crate::job::{BroadcastProgressSink, JobStatusView};
use crate::pipeline::{AnalysisRequest, ServiceError, DEFAULT_LEASE};
use crate::slicer::{PrintSettings, PrusaSlicerRunner, SlicingEngine};
use crate::workspace::WorkspaceManager;

/// STL analysis service
///
/// Validates triangulated meshes and estimates material use and print time
/// with an external slicing engine.
#[derive(Debug, Parser)]
#[command(name = "stl-analysis")]
#[command(about = "Mesh validation and print analysis", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP API and the worker pool (default)
    Serve,

    /// Check a mesh file and print what was learned about it
    Validate {
        path: PathBuf,

        /// Expected encoding; sniffed from the content when omitted
        #[arg(long)]
        encoding: Option<GeometryEncoding>,
    },

    /// Run one analysis in-process and print the outcome as JSON
    Analyze {
        path: PathBuf,

        /// JSON file with print settings; omitted fields take defaults
        #[arg(long)]
        settings: Option<PathBuf>,
    },

    /// Apply database migrations
    Migrate,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("mesh rejected: {0}")]
    Rejected(#[from] GeometryRejection),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Settings(#[from] serde_json::Error),
    #[error("{} does not name a file", .0.display())]
    NotAFile(PathBuf),
    #[error("DATABASE_URL is not set")]
    NoDatabase,
    #[error("analysis of job {0} did not finish")]
    Unfinished(String),
}

/// Terminal state of an in-process analysis.
#[derive(Debug, Serialize)]
pub struct AnalyzeOutput {
    pub job: JobStatusView,
    pub result: Option<ResultResponse>,
}

pub fn validate(
    limits: ValidatorLimits,
    path: &Path,
    encoding: Option<GeometryEncoding>,
) -> Result<GeometryReport, CommandError> {
    Ok(GeometryValidator::new(limits).validate(path, encoding)?)
}

pub async fn run_validate(
    config: &Config,
    path: &Path,
    encoding: Option<GeometryEncoding>,
) -> Result<(), CommandError> {
    let report = validate(config.validator_limits(), path, encoding)?;
    print_json(&report)
}

/// Submit `path` to a private in-memory pipeline, run it to a terminal
/// state and return the outcome. A failed job is still `Ok`.
pub async fn analyze(
    limits: ValidatorLimits,
    workspace_root: &Path,
    engine: Arc<dyn SlicingEngine>,
    path: &Path,
    settings: PrintSettings,
) -> Result<AnalyzeOutput, CommandError> {
    let (upload_dir, file_ref) = split_path(path)?;
    std::fs::create_dir_all(workspace_root).map_err(|source| CommandError::Read {
        path: workspace_root.to_path_buf(),
        source,
    })?;

    let events = Arc::new(BroadcastProgressSink::default());
    let runtime = app::assemble(
        app::in_memory(upload_dir, events.clone()),
        GeometryValidator::new(limits),
        WorkspaceManager::new(workspace_root),
        engine,
        events,
        None,
        DEFAULT_LEASE,
    );

    let job_id = runtime
        .service
        .submit(AnalysisRequest::new(file_ref, settings))
        .await?;
    if let Some(queued) = runtime.collaborators.queue.dequeue().await {
        runtime.pipeline.process(&queued).await;
    }

    let job = runtime.service.status(&job_id).await?;
    if !job.status.is_terminal() {
        return Err(CommandError::Unfinished(job_id));
    }
    let result = match &job.result_ref {
        Some(result_ref) => Some(ResultResponse::from(runtime.service.result(result_ref).await?)),
        None => None,
    };
    Ok(AnalyzeOutput { job, result })
}

pub async fn run_analyze(
    config: &Config,
    path: &Path,
    settings: Option<&Path>,
) -> Result<(), CommandError> {
    let settings = match settings {
        Some(settings_path) => load_settings(settings_path)?,
        None => PrintSettings::default(),
    };
    let engine: Arc<dyn SlicingEngine> = Arc::new(PrusaSlicerRunner::new(config.runner_config()));
    let output = analyze(
        config.validator_limits(),
        &config.workspace_root,
        engine,
        path,
        settings,
    )
    .await?;
    print_json(&output)
}

pub async fn run_migrate(config: &Config) -> Result<(), CommandError> {
    let url = config.database_url.as_deref().ok_or(CommandError::NoDatabase)?;
    let pool = db::connection::get_connection(url, config.max_db_connections)
        .await
        .map_err(StartupError::from)?;
    db::migrations::run_migrations(&pool)
        .await
        .map_err(StartupError::from)?;
    pool.close().await;
    info!("Migrations applied");
    Ok(())
}

fn load_settings(path: &Path) -> Result<PrintSettings, CommandError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CommandError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Split a mesh path into the directory served as the upload root and the
/// file reference under it.
fn split_path(path: &Path) -> Result<(PathBuf, String), CommandError> {
    let file_ref = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| CommandError::NotAFile(path.to_path_buf()))?
        .to_string();
    let upload_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((upload_dir, file_ref))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CommandError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
