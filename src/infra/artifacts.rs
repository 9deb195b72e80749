use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::application::repos::{ArtifactError, ArtifactLoader};
use crate::cache::TemplateHandle;

use super::fs::FileProbe;

/// Template source text as loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub path: PathBuf,
    pub body: String,
}

/// Loads templates as raw source. Rendering engines downcast the handle to
/// [`TemplateSource`] and compile it themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceArtifactLoader {
    probe: FileProbe,
}

impl SourceArtifactLoader {
    pub fn new(probe: FileProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl ArtifactLoader for SourceArtifactLoader {
    async fn load(&self, path: &Path) -> Result<TemplateHandle, ArtifactError> {
        let body = self.probe.read_to_string(path).await.map_err(|err| {
            if err.is_not_found() {
                ArtifactError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ArtifactError::load(path, err.to_string())
            }
        })?;
        debug!(
            target = "infra::artifacts",
            path = %path.display(),
            bytes = body.len(),
            "template source loaded"
        );
        Ok(TemplateHandle::new(TemplateSource {
            path: path.to_path_buf(),
            body,
        }))
    }
}
