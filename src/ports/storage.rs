use async_trait::async_trait;
use std::error::Error;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage request for {key} failed: {source}")]
    Request {
        key: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn request(key: &str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Request {
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Object storage holding raw chunks and published recordings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// List every object key under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Download an object to a local path
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Upload a file from a local path to storage
    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError>;
}
