use crate::ports::storage::{StorageError, StoragePort};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// A local directory acting as a bucket. Object keys map to relative paths.
#[derive(Clone, Debug)]
pub struct FsAdapter {
    root: PathBuf,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !key_is_valid(key) {
            return Err(StorageError::request(key, "invalid object key"));
        }
        Ok(self.root.join(key))
    }
}

fn key_is_valid(key: &str) -> bool {
    !key.is_empty()
        && Path::new(key)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

#[async_trait]
impl StoragePort for FsAdapter {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let root = self.root.clone();
        let wanted = prefix.to_string();

        let keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            if !root.exists() {
                return Ok(keys);
            }
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| StorageError::request(&wanted, e))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&wanted) {
                    keys.push(key);
                }
            }
            Ok::<_, StorageError>(keys)
        })
        .await
        .map_err(|e| StorageError::request(prefix, e))??;

        Ok(keys)
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let source = self.object_path(key)?;
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| StorageError::io(&source, e))?;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let dest = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        tokio::fs::copy(local_path, &dest)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        Ok(())
    }
}
