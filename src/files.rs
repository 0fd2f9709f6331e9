use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileSourceError {
    #[error("file reference '{0}' is not allowed")]
    InvalidReference(String),
    #[error("file '{0}' not found")]
    NotFound(String),
    #[error("failed to access '{file_ref}': {source}")]
    Io {
        file_ref: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read-only access to uploaded meshes.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Resolve `file_ref` to a local path the caller may read.
    async fn fetch(&self, file_ref: &str) -> Result<PathBuf, FileSourceError>;
}

/// Serves files from one directory. References are relative paths under it.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    root: PathBuf,
}

impl LocalFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, file_ref: &str) -> Result<PathBuf, FileSourceError> {
        let relative = Path::new(file_ref);
        let contained = !file_ref.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(FileSourceError::InvalidReference(file_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileSource for LocalFileSource {
    async fn fetch(&self, file_ref: &str) -> Result<PathBuf, FileSourceError> {
        let path = self.resolve(file_ref)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(FileSourceError::NotFound(file_ref.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileSourceError::NotFound(file_ref.to_string()))
            }
            Err(source) => Err(FileSourceError::Io {
                file_ref: file_ref.to_string(),
                source,
            }),
        }
    }
}
