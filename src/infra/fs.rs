//! Filesystem access with a bounded wait.
//!
//! Every disk-touching call made while resolving or caching templates goes
//! through [`FileProbe`] so a slow or wedged filesystem surfaces as an error
//! (or a "not present" answer) instead of hanging a render.

use std::fs::Metadata;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use super::error::InfraError;

const SOURCE: &str = "infra::fs";

#[derive(Debug, Clone, Copy)]
pub struct FileProbe {
    timeout: Duration,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

impl FileProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, op: &'static str, path: &Path, fut: F) -> Result<T, InfraError>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(InfraError::from),
            Err(_) => {
                warn!(
                    target = SOURCE,
                    op,
                    path = %path.display(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "filesystem call timed out"
                );
                Err(InfraError::Timeout {
                    op,
                    path: path.to_path_buf(),
                    timeout_ms: self.timeout.as_millis(),
                })
            }
        }
    }

    pub async fn metadata(&self, path: &Path) -> Result<Metadata, InfraError> {
        self.bounded("metadata", path, tokio::fs::metadata(path)).await
    }

    /// `true` only when `path` is a regular file; errors and timeouts count as absent.
    pub async fn is_file(&self, path: &Path) -> bool {
        self.metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    pub async fn is_dir(&self, path: &Path) -> bool {
        self.metadata(path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, InfraError> {
        self.bounded("read", path, tokio::fs::read(path)).await
    }

    pub async fn read_to_string(&self, path: &Path) -> Result<String, InfraError> {
        self.bounded("read_to_string", path, tokio::fs::read_to_string(path))
            .await
    }

    /// List a directory, sorted by name.
    pub async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>, InfraError> {
        self.bounded("list_dir", path, async {
            let mut entries = Vec::new();
            let mut reader = tokio::fs::read_dir(path).await?;
            while let Some(entry) = reader.next_entry().await? {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                let is_dir = entry.file_type().await?.is_dir();
                entries.push(DirEntryInfo {
                    name,
                    path: entry.path(),
                    is_dir,
                });
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .await
    }
}

impl Default for FileProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}
