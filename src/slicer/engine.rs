use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::settings::PrintSettings;
use crate::workspace::Workspace;

/// Artifact produced by a successful engine run.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub artifact: PathBuf,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to write engine configuration: {0}")]
    Config(#[source] std::io::Error),
    #[error("failed to start slicing engine: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("slicing engine process error: {0}")]
    Io(#[source] std::io::Error),
    #[error("slicing engine failed ({status}): {diagnostic}")]
    Failed { status: String, diagnostic: String },
    #[error("slicing engine timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("slicing engine did not produce {}", .0.display())]
    MissingOutput(PathBuf),
}

/// A slicing engine: turns a prepared workspace plus settings into an
/// output artifact. Implementations never touch job state.
#[async_trait]
pub trait SlicingEngine: Send + Sync {
    async fn run(
        &self,
        workspace: &Workspace,
        settings: &PrintSettings,
    ) -> Result<EngineOutput, EngineError>;
}
