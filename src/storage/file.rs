use super::StateStore;
use crate::error::{ResilienceError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Store keeping one `<key>.json` file per entry under a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ResilienceError::Storage(format!(
                "Failed to create state directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ResilienceError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn save(&self, key: &str, value: String) -> Result<()> {
        let path = self.path_for(key);
        // Write then rename so readers never see a torn record
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value.as_bytes()).await.map_err(|e| {
            ResilienceError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            ResilienceError::Storage(format!("Failed to replace {}: {}", path.display(), e))
        })?;

        debug!(key = key, path = %path.display(), "Persisted state");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ResilienceError::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
