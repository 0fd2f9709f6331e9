use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::engine::{EngineError, EngineOutput, SlicingEngine};
use super::engine_config::EngineConfig;
use super::settings::PrintSettings;
use crate::workspace::{Workspace, CONFIG_FILE, INPUT_FILE, OUTPUT_FILE};

const CONTAINER_MOUNT: &str = "/workspace";
const MAX_DIAGNOSTIC_BYTES: usize = 4096;
const CONTAINER_REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// How the engine process is launched.
#[derive(Debug, Clone)]
pub enum EngineMode {
    /// Run inside a throwaway container with no network and only the
    /// workspace mounted.
    Container {
        runtime: String,
        image: String,
        memory_limit: String,
        cpus: String,
    },
    /// Run a local executable with a cleared environment, working directory
    /// set to the workspace. `args` are placed before the engine arguments.
    Local { program: PathBuf, args: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: EngineMode,
    pub timeout: Duration,
}

/// Runs PrusaSlicer (or anything with its command-line contract) against a
/// workspace.
#[derive(Debug, Clone)]
pub struct PrusaSlicerRunner {
    config: RunnerConfig,
}

impl PrusaSlicerRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn container_name(workspace: &Workspace) -> String {
        format!("slicer-{}", workspace.job_id())
    }

    fn command(&self, workspace: &Workspace) -> Command {
        match &self.config.mode {
            EngineMode::Container {
                runtime,
                image,
                memory_limit,
                cpus,
            } => {
                let mut cmd = Command::new(runtime);
                cmd.arg("run")
                    .arg("--rm")
                    .args(["--name", &Self::container_name(workspace)])
                    .args(["--network", "none"])
                    .args(["--memory", memory_limit])
                    .args(["--cpus", cpus])
                    .args(["--pids-limit", "256"])
                    .args(["--security-opt", "no-new-privileges"])
                    .arg("-v")
                    .arg(format!("{}:{CONTAINER_MOUNT}", workspace.path().display()))
                    .arg(image);
                engine_args(&mut cmd, Path::new(CONTAINER_MOUNT));
                cmd
            }
            EngineMode::Local { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args)
                    .current_dir(workspace.path())
                    .env_clear()
                    .env("HOME", workspace.path());
                if let Some(path) = std::env::var_os("PATH") {
                    cmd.env("PATH", path);
                }
                engine_args(&mut cmd, workspace.path());
                cmd
            }
        }
    }

    /// Force-remove a container whose CLI client was killed on timeout.
    async fn remove_container(&self, workspace: &Workspace) {
        let EngineMode::Container { runtime, .. } = &self.config.mode else {
            return;
        };
        let name = Self::container_name(workspace);
        let removal = Command::new(runtime)
            .args(["rm", "-f", &name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(CONTAINER_REMOVE_TIMEOUT, removal).await {
            Ok(Ok(status)) if status.success() => debug!(container = %name, "removed timed-out container"),
            Ok(Ok(status)) => warn!(container = %name, %status, "container removal reported failure"),
            Ok(Err(e)) => warn!(container = %name, error = %e, "failed to run container removal"),
            Err(_) => warn!(container = %name, "container removal timed out"),
        }
    }
}

/// SIGKILL every process in the group led by `pid`.
async fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    if !cfg!(unix) {
        return;
    }
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("kill -KILL -- -{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => debug!(pgid = pid, "killed engine process group"),
        // the group is already empty when nothing outlived the engine
        Ok(status) => debug!(pgid = pid, %status, "engine process group already gone"),
        Err(e) => warn!(pgid = pid, error = %e, "failed to signal engine process group"),
    }
}

fn engine_args(cmd: &mut Command, base: &Path) {
    cmd.arg("--load-config")
        .arg(base.join(CONFIG_FILE))
        .arg("--output")
        .arg(base.join(OUTPUT_FILE))
        .arg("--export-gcode")
        .arg(base.join(INPUT_FILE));
}

/// Tail of the engine's stderr (stdout when stderr is empty), trimmed.
fn diagnostic_text(stderr: &[u8], stdout: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    if text.is_empty() {
        return "no diagnostic output".to_string();
    }
    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text;
    }
    let mut start = text.len() - MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[async_trait]
impl SlicingEngine for PrusaSlicerRunner {
    async fn run(
        &self,
        workspace: &Workspace,
        settings: &PrintSettings,
    ) -> Result<EngineOutput, EngineError> {
        let config = EngineConfig::from_settings(settings);
        tokio::fs::write(workspace.config_path(), config.render())
            .await
            .map_err(EngineError::Config)?;

        let mut cmd = self.command(workspace);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        info!(
            job_id = %workspace.job_id(),
            program = ?cmd.as_std().get_program(),
            timeout_secs = self.config.timeout.as_secs_f64(),
            "starting slicing engine"
        );

        let started = Instant::now();
        let child = cmd.spawn().map_err(EngineError::Spawn)?;
        let pid = child.id();

        // Dropping the wait future on timeout drops the child, which kills it.
        // Anything it started is reached through its process group.
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(EngineError::Io)?,
            Err(_) => {
                warn!(job_id = %workspace.job_id(), "slicing engine exceeded timeout; killed");
                kill_process_group(pid).await;
                self.remove_container(workspace).await;
                return Err(EngineError::Timeout(self.config.timeout));
            }
        };
        let elapsed = started.elapsed();

        if !output.status.success() {
            let diagnostic = diagnostic_text(&output.stderr, &output.stdout);
            warn!(
                job_id = %workspace.job_id(),
                status = %output.status,
                diagnostic = %diagnostic,
                "slicing engine failed"
            );
            return Err(EngineError::Failed {
                status: output.status.to_string(),
                diagnostic,
            });
        }

        let artifact = workspace.output_path();
        let produced = tokio::fs::metadata(&artifact)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !produced {
            warn!(job_id = %workspace.job_id(), "engine exited cleanly without an output artifact");
            return Err(EngineError::MissingOutput(artifact));
        }

        info!(
            job_id = %workspace.job_id(),
            elapsed_ms = elapsed.as_millis() as u64,
            "slicing engine finished"
        );
        Ok(EngineOutput { artifact, elapsed })
    }
}
