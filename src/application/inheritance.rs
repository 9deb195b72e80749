//! Parent chains and merged configuration.

use std::sync::Arc;

use tracing::debug;

use crate::domain::error::ThemeError;
use crate::domain::manifest::ThemeManifest;

use super::manifest::ManifestLoader;

/// Maximum number of parent hops followed from the starting theme.
pub const MAX_INHERITANCE_DEPTH: usize = 5;

pub struct InheritanceResolver {
    manifests: Arc<ManifestLoader>,
}

impl InheritanceResolver {
    pub fn new(manifests: Arc<ManifestLoader>) -> Self {
        Self { manifests }
    }

    pub fn manifests(&self) -> &Arc<ManifestLoader> {
        &self.manifests
    }

    /// `theme` first, then its parent, grandparent and so on.
    pub async fn hierarchy(&self, theme: &str) -> Result<Vec<String>, ThemeError> {
        Ok(self
            .chain(theme)
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Manifest of every theme in the chain, most specific first.
    pub async fn chain(
        &self,
        theme: &str,
    ) -> Result<Vec<(String, Arc<ThemeManifest>)>, ThemeError> {
        let mut chain: Vec<(String, Arc<ThemeManifest>)> = Vec::new();
        let mut next = Some(theme.to_string());

        while let Some(current) = next.take() {
            let seen = chain.iter().any(|(name, _)| *name == current);
            if seen || chain.len() > MAX_INHERITANCE_DEPTH {
                let names = chain.into_iter().map(|(name, _)| name).collect();
                return Err(ThemeError::CircularInheritance {
                    offending: current,
                    chain: names,
                });
            }

            let manifest = self
                .manifests
                .load(&current)
                .await
                .map_err(|err| ThemeError::theme_not_found(&current, err.to_string()))?;

            next = manifest
                .parent
                .as_deref()
                .map(str::trim)
                .filter(|parent| !parent.is_empty())
                .map(str::to_string);
            chain.push((current, manifest));
        }

        debug!(
            target = "application::inheritance",
            theme,
            depth = chain.len(),
            "hierarchy resolved"
        );
        Ok(chain)
    }

    /// Effective manifest of `theme`: ancestors folded from the root down so
    /// the most specific theme wins.
    pub async fn merged_config(&self, theme: &str) -> Result<ThemeManifest, ThemeError> {
        let chain = self.chain(theme).await?;
        let mut ordered = chain.into_iter().rev().map(|(_, manifest)| manifest);
        let Some(root) = ordered.next() else {
            return Err(ThemeError::theme_not_found(theme, "empty hierarchy"));
        };

        let mut merged = ThemeManifest::clone(&root);
        for manifest in ordered {
            merged.overlay(&manifest);
        }
        Ok(merged)
    }
}
