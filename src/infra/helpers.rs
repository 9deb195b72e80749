//! Helper binding from `<theme>/helpers/`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use crate::application::inheritance::InheritanceResolver;
use crate::application::repos::{HelperError, HelperLoader};
use crate::cache::{rw_read, rw_write};

use super::fs::FileProbe;

const SOURCE: &str = "infra::helpers";

/// Helpers currently bound for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundHelpers {
    pub theme: String,
    /// Helper name (file stem) to the file that provides it.
    pub helpers: BTreeMap<String, PathBuf>,
}

/// Binds every helper file found along a theme's hierarchy. A child's helper
/// replaces a parent helper with the same file stem.
pub struct DirectoryHelperLoader {
    inheritance: Arc<InheritanceResolver>,
    probe: FileProbe,
    bound: RwLock<Option<BoundHelpers>>,
}

impl DirectoryHelperLoader {
    pub fn new(inheritance: Arc<InheritanceResolver>, probe: FileProbe) -> Self {
        Self {
            inheritance,
            probe,
            bound: RwLock::new(None),
        }
    }

    pub fn bound(&self) -> Option<BoundHelpers> {
        rw_read(&self.bound, SOURCE, "bound").clone()
    }
}

#[async_trait]
impl HelperLoader for DirectoryHelperLoader {
    async fn load_helpers(&self, theme: &str) -> Result<(), HelperError> {
        let chain = self
            .inheritance
            .hierarchy(theme)
            .await
            .map_err(|err| HelperError::new(theme, err.to_string()))?;
        let layout = self.inheritance.manifests().layout();

        let mut helpers = BTreeMap::new();
        for member in chain.iter().rev() {
            let dir = layout.helpers_dir(member);
            if !self.probe.is_dir(&dir).await {
                continue;
            }
            let entries = self
                .probe
                .list_dir(&dir)
                .await
                .map_err(|err| HelperError::new(theme, err.to_string()))?;
            for entry in entries.into_iter().filter(|entry| !entry.is_dir) {
                let Some(stem) = entry.path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                if stem.starts_with('.') {
                    continue;
                }
                helpers.insert(stem.to_string(), entry.path.clone());
            }
        }

        info!(
            target = "infra::helpers",
            theme,
            helpers = helpers.len(),
            "theme helpers bound"
        );
        *rw_write(&self.bound, SOURCE, "load_helpers") = Some(BoundHelpers {
            theme: theme.to_string(),
            helpers,
        });
        Ok(())
    }
}
