use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fixed name of the working copy; the uploader's filename is never used.
pub const INPUT_FILE: &str = "input.stl";
pub const CONFIG_FILE: &str = "config.ini";
pub const OUTPUT_FILE: &str = "output.gcode";

const MAX_JOB_ID_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("job id '{0}' is not usable as a workspace name")]
    InvalidJobId(String),
    #[error("workspace for job {0} is already held by another worker")]
    AlreadyHeld(String),
    #[error("workspace I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Job ids become directory names, so only a conservative alphabet is allowed.
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

type HeldSet = Arc<Mutex<HashSet<String>>>;

fn unhold(held: &HeldSet, job_id: &str) {
    match held.lock() {
        Ok(mut set) => {
            set.remove(job_id);
        }
        Err(poisoned) => {
            poisoned.into_inner().remove(job_id);
        }
    }
}

/// Allocates per-job directories under a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    held: HeldSet,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// Create (or reuse, on redelivery) the workspace for `job_id` and copy
    /// `source` into it as [`INPUT_FILE`].
    ///
    /// At most one live [`Workspace`] exists per job id in this process.
    /// A directory left behind by an earlier delivery is reused after its
    /// stale engine files are cleared.
    pub async fn acquire(&self, job_id: &str, source: &Path) -> Result<Workspace, WorkspaceError> {
        if !is_valid_job_id(job_id) {
            return Err(WorkspaceError::InvalidJobId(job_id.to_string()));
        }

        {
            let mut held = self
                .held
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !held.insert(job_id.to_string()) {
                return Err(WorkspaceError::AlreadyHeld(job_id.to_string()));
            }
        }

        // From here on the guard owns cleanup, including on the error paths below.
        let workspace = Workspace {
            job_id: job_id.to_string(),
            path: self.path_for(job_id),
            held: Arc::clone(&self.held),
            released: false,
        };

        tokio::fs::create_dir_all(&workspace.path)
            .await
            .map_err(|e| WorkspaceError::io(&workspace.path, e))?;

        for stale in [CONFIG_FILE, OUTPUT_FILE] {
            let stale_path = workspace.path.join(stale);
            match tokio::fs::remove_file(&stale_path).await {
                Ok(()) => debug!(job_id, file = stale, "cleared stale workspace file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(WorkspaceError::io(&stale_path, e)),
            }
        }

        let input = workspace.input_path();
        tokio::fs::copy(source, &input)
            .await
            .map_err(|e| WorkspaceError::io(source, e))?;

        info!(job_id, path = %workspace.path.display(), "workspace acquired");
        Ok(workspace)
    }

    /// Release the workspace. Releasing twice is a no-op.
    pub async fn release(&self, workspace: &mut Workspace) -> Result<(), WorkspaceError> {
        workspace.release().await
    }

    /// Remove whatever is on disk for `job_id`, if anything. No-op when the
    /// workspace was never acquired or is already gone.
    pub async fn release_by_id(&self, job_id: &str) -> Result<(), WorkspaceError> {
        if !is_valid_job_id(job_id) {
            return Ok(());
        }
        remove_tree(&self.path_for(job_id)).await?;
        unhold(&self.held, job_id);
        Ok(())
    }

    /// Job ids of every workspace directory currently on disk.
    pub async fn job_dirs(&self) -> Result<Vec<String>, WorkspaceError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkspaceError::io(&self.root, e)),
        };
        let mut job_ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let Some(name) = entry.file_name().to_str() {
                if is_dir && is_valid_job_id(name) {
                    job_ids.push(name.to_string());
                }
            }
        }
        job_ids.sort();
        Ok(job_ids)
    }

    pub fn is_held(&self, job_id: &str) -> bool {
        self.held
            .lock()
            .map(|set| set.contains(job_id))
            .unwrap_or(false)
    }
}

async fn remove_tree(path: &Path) -> Result<(), WorkspaceError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WorkspaceError::io(path, e)),
    }
}

/// Scoped handle on a job's directory.
///
/// Dropping an unreleased workspace removes it synchronously, so every exit
/// path of the owning job cleans up even without an explicit release.
#[derive(Debug)]
pub struct Workspace {
    job_id: String,
    path: PathBuf,
    held: HeldSet,
    released: bool,
}

impl Workspace {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_path(&self) -> PathBuf {
        self.path.join(INPUT_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.path.join(OUTPUT_FILE)
    }

    pub async fn release(&mut self) -> Result<(), WorkspaceError> {
        if self.released {
            return Ok(());
        }
        remove_tree(&self.path).await?;
        self.released = true;
        unhold(&self.held, &self.job_id);
        info!(job_id = %self.job_id, "workspace released");
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(job_id = %self.job_id, "workspace removed on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = %self.job_id,
                path = %self.path.display(),
                error = %e,
                "failed to remove workspace on drop"
            ),
        }
        unhold(&self.held, &self.job_id);
    }
}
