use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::repos::ArtifactLoader;
use crate::domain::layout::ThemeLayout;
use crate::domain::manifest::ThemeManifest;
use crate::infra::fs::FileProbe;

use super::config::ThemeCacheConfig;
use super::hash::{FileDigest, FileHashCache};
use super::stats::{CacheCounters, CacheStats, MemoryStats};
use super::store::{CachedConfig, CachedTemplate, ConfigStore, TemplateHandle, TemplateStore};

/// Outcome of a best-effort warmup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    pub theme: String,
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Process-wide cache of compiled templates, merged manifests and file digests.
///
/// Constructed once and shared behind an `Arc`. Every read re-validates the
/// entry against its TTL and the current digest of its source file; anything
/// that cannot be validated is a miss.
pub struct ThemeCache {
    config: ThemeCacheConfig,
    layout: ThemeLayout,
    probe: FileProbe,
    templates: TemplateStore,
    configs: ConfigStore,
    hashes: FileHashCache,
    counters: CacheCounters,
}

impl ThemeCache {
    pub fn new(config: ThemeCacheConfig, layout: ThemeLayout, probe: FileProbe) -> Self {
        let templates = TemplateStore::new(config.max_templates_non_zero());
        Self {
            config,
            layout,
            probe,
            templates,
            configs: ConfigStore::default(),
            hashes: FileHashCache::new(probe),
            counters: CacheCounters::default(),
        }
    }

    pub fn config(&self) -> &ThemeCacheConfig {
        &self.config
    }

    pub fn layout(&self) -> &ThemeLayout {
        &self.layout
    }

    pub async fn get_cached_template(&self, path: &Path) -> Option<TemplateHandle> {
        if !self.config.is_enabled() {
            self.counters.template_miss();
            return None;
        }

        let Some(entry) = self.templates.peek(path) else {
            self.counters.template_miss();
            return None;
        };

        if entry.is_expired(self.config.ttl) {
            debug!(target = "cache::service", path = %path.display(), "template entry expired");
            self.templates.remove_if_same(path, entry.id());
            self.counters.template_miss();
            return None;
        }

        let current = self.hashes.digest(path).await.map(|digest| digest.digest);
        if current.is_none() || current != entry.content_hash {
            debug!(target = "cache::service", path = %path.display(), "template source changed");
            self.templates.remove_if_same(path, entry.id());
            self.counters.template_miss();
            return None;
        }

        self.counters.template_hit();
        Some(entry.handle)
    }

    /// Digest of `path` as it is now. Take it before the artifact is read so
    /// the entry is keyed to the bytes the handle was built from.
    pub async fn file_digest(&self, path: &Path) -> Option<FileDigest> {
        if !self.config.is_enabled() {
            return None;
        }
        self.hashes.digest(path).await
    }

    pub async fn cache_template(&self, path: &Path, handle: TemplateHandle) {
        let digest = self.file_digest(path).await;
        self.cache_template_with_digest(path, handle, digest);
    }

    /// Store `handle` under a digest taken before it was loaded. A later edit
    /// then changes the live digest and the entry reads as a miss.
    pub fn cache_template_with_digest(
        &self,
        path: &Path,
        handle: TemplateHandle,
        digest: Option<FileDigest>,
    ) {
        if !self.config.is_enabled() {
            return;
        }

        let size_bytes = digest.as_ref().map_or(0, |digest| digest.size_bytes);
        let entry = CachedTemplate::new(
            path.to_path_buf(),
            handle,
            digest.map(|digest| digest.digest),
            size_bytes,
        );

        if let Some(evicted) = self.templates.insert(entry) {
            self.counters.template_evicted();
            debug!(
                target = "cache::service",
                evicted = %evicted.path.display(),
                loaded_at = %evicted.loaded_at,
                "evicted oldest template"
            );
        }
    }

    pub async fn get_cached_config(&self, theme: &str) -> Option<Arc<ThemeManifest>> {
        if !self.config.is_enabled() {
            self.counters.config_miss();
            return None;
        }

        let Some(entry) = self.configs.get(theme) else {
            self.counters.config_miss();
            return None;
        };

        if entry.is_expired(self.config.ttl) {
            self.configs.remove_if_same(theme, entry.id());
            self.counters.config_miss();
            return None;
        }

        if let Some((path, digest)) = &entry.source {
            let current = self.hashes.digest(path).await;
            if current.as_ref().map(|current| &current.digest) != Some(digest) {
                debug!(target = "cache::service", theme, "manifest changed on disk");
                self.configs.remove_if_same(theme, entry.id());
                self.counters.config_miss();
                return None;
            }
        }

        self.counters.config_hit();
        Some(entry.manifest)
    }

    /// Cache `manifest` for `theme`, fingerprinting the manifest file as it is now.
    pub async fn cache_config(&self, theme: &str, manifest: Arc<ThemeManifest>) {
        if !self.config.is_enabled() {
            return;
        }

        let source = self.manifest_source(theme).await;
        self.cache_config_with_source(theme, manifest, source);
    }

    /// Cache `manifest` parsed from `source`, whose digest was taken before
    /// the file was read.
    pub fn cache_config_with_source(
        &self,
        theme: &str,
        manifest: Arc<ThemeManifest>,
        source: Option<(PathBuf, FileDigest)>,
    ) {
        if !self.config.is_enabled() {
            return;
        }

        let source = source.map(|(path, digest)| (path, digest.digest));
        self.configs
            .insert(CachedConfig::new(theme.to_string(), manifest, source));
    }

    async fn manifest_source(&self, theme: &str) -> Option<(PathBuf, FileDigest)> {
        for candidate in self.layout.manifest_candidates(theme) {
            if let Some(digest) = self.hashes.digest(&candidate).await {
                return Some((candidate, digest));
            }
        }
        None
    }

    /// Drop the config of `theme` and every template stored under its directory.
    pub fn invalidate_theme(&self, theme: &str) {
        let config_removed = self.configs.remove(theme);
        let templates_removed = self.templates.remove_under(&self.layout.theme_dir(theme));
        info!(
            target = "cache::service",
            theme,
            config_removed,
            templates_removed,
            "theme cache invalidated"
        );
    }

    pub fn invalidate_all(&self) {
        self.templates.clear();
        self.configs.clear();
        self.hashes.clear();
        info!(target = "cache::service", "all theme caches invalidated");
    }

    /// Pre-load `names` from `theme`'s own templates directory.
    ///
    /// Missing files are skipped and load failures are logged; neither aborts
    /// the pass.
    pub async fn warmup(
        &self,
        theme: &str,
        names: &[String],
        loader: &dyn ArtifactLoader,
    ) -> WarmupReport {
        let mut report = WarmupReport {
            theme: theme.to_string(),
            ..Default::default()
        };

        for name in names {
            let path = self.layout.template_path(theme, name);
            if !self.probe.is_file(&path).await {
                debug!(target = "cache::service", theme, template = %name, "warmup skipped missing template");
                report.skipped.push(name.clone());
                continue;
            }
            let digest = self.file_digest(&path).await;
            match loader.load(&path).await {
                Ok(handle) => {
                    self.cache_template_with_digest(&path, handle, digest);
                    report.loaded.push(name.clone());
                }
                Err(err) => {
                    warn!(
                        target = "cache::service",
                        theme,
                        template = %name,
                        error = %err,
                        "failed to warm template"
                    );
                    report.failed.push((name.clone(), err.to_string()));
                }
            }
        }

        info!(
            target = "cache::service",
            theme,
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "theme cache warmed"
        );
        report
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            templates: self
                .counters
                .template_stats(self.templates.len(), self.config.max_templates_non_zero().get()),
            configs: self.counters.config_stats(self.configs.len()),
            memory: {
                let template_bytes = self.templates.total_size();
                let config_bytes = self.configs.total_size();
                MemoryStats {
                    template_bytes,
                    config_bytes,
                    total_bytes: template_bytes + config_bytes,
                    hashed_files: self.hashes.len(),
                }
            },
        }
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }
}
