//! Wiring for the theme subsystem.
//!
//! [`ThemeEngine`] owns one instance of every service and hands out shared
//! references, so the cache and the active-theme pointer stay single-instance
//! without being globals.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheStats, ThemeCache, ThemeCacheConfig, WarmupReport};
use crate::config::Settings;
use crate::domain::error::ThemeError;
use crate::domain::kind::{ContentKind, TemplateParams};
use crate::domain::layout::ThemeLayout;
use crate::domain::manifest::ThemeManifest;
use crate::infra::artifacts::SourceArtifactLoader;
use crate::infra::error::InfraError;
use crate::infra::fs::FileProbe;
use crate::infra::helpers::DirectoryHelperLoader;

use super::activation::{self, ActivationOutcome, ThemeActivator, WarmupPlan};
use super::active::ActiveTheme;
use super::customizer::ThemeCustomizer;
use super::hierarchy::TemplateResolver;
use super::inheritance::InheritanceResolver;
use super::manifest::ManifestLoader;
use super::repos::{ArtifactLoader, HelperLoader, SettingsStore};
use super::transfer::ConfigTransfer;
use super::validator::{ThemeValidator, ValidationReport};

const DEFAULT_THEME: &str = "default";

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub layout: ThemeLayout,
    pub cache: ThemeCacheConfig,
    pub probe: FileProbe,
    pub default_theme: String,
    pub runtime_version: String,
    pub required_templates: Vec<String>,
    pub warmup_templates: Vec<String>,
    pub asset_base_url: String,
}

impl EngineOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let templates: Vec<String> = crate::config::DEFAULT_TEMPLATE_SET
            .iter()
            .map(|name| name.to_string())
            .collect();
        Self {
            layout: ThemeLayout::new(root, "tmpl"),
            cache: ThemeCacheConfig::default(),
            probe: FileProbe::default(),
            default_theme: DEFAULT_THEME.to_string(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            required_templates: templates.clone(),
            warmup_templates: templates,
            asset_base_url: String::new(),
        }
    }
}

impl From<&Settings> for EngineOptions {
    fn from(settings: &Settings) -> Self {
        let themes = &settings.themes;
        Self {
            layout: ThemeLayout::new(&themes.root, &themes.template_extension),
            cache: ThemeCacheConfig::from(&settings.cache),
            probe: FileProbe::new(themes.io_timeout),
            default_theme: themes.default_theme.clone(),
            runtime_version: themes.runtime_version.clone(),
            required_templates: themes.required_templates.clone(),
            warmup_templates: themes.warmup_templates.clone(),
            asset_base_url: themes.asset_base_url.clone(),
        }
    }
}

pub struct ThemeEngine {
    options: EngineOptions,
    cache: Arc<ThemeCache>,
    manifests: Arc<ManifestLoader>,
    inheritance: Arc<InheritanceResolver>,
    active: Arc<ActiveTheme>,
    resolver: Arc<TemplateResolver>,
    validator: Arc<ThemeValidator>,
    activator: ThemeActivator,
    transfer: Arc<ConfigTransfer>,
    customizer: Arc<ThemeCustomizer>,
    artifacts: Arc<dyn ArtifactLoader>,
}

impl ThemeEngine {
    /// Build with the filesystem helper and artifact loaders.
    pub async fn build(options: EngineOptions, settings: Arc<dyn SettingsStore>) -> Self {
        Self::build_with(options, settings, None, None).await
    }

    /// Build with caller-supplied collaborators; `None` selects the default.
    pub async fn build_with(
        options: EngineOptions,
        settings: Arc<dyn SettingsStore>,
        helpers: Option<Arc<dyn HelperLoader>>,
        artifacts: Option<Arc<dyn ArtifactLoader>>,
    ) -> Self {
        let probe = options.probe;
        let cache = Arc::new(ThemeCache::new(
            options.cache.clone(),
            options.layout.clone(),
            probe,
        ));
        let manifests = Arc::new(ManifestLoader::new(
            options.layout.clone(),
            probe,
            Arc::clone(&cache),
        ));
        let inheritance = Arc::new(InheritanceResolver::new(Arc::clone(&manifests)));
        let active = Arc::new(ActiveTheme::restore(settings.as_ref(), &options.default_theme).await);

        let artifacts: Arc<dyn ArtifactLoader> =
            artifacts.unwrap_or_else(|| Arc::new(SourceArtifactLoader::new(probe)));
        let helpers: Arc<dyn HelperLoader> = helpers.unwrap_or_else(|| {
            Arc::new(DirectoryHelperLoader::new(Arc::clone(&inheritance), probe))
        });

        let resolver = Arc::new(TemplateResolver::new(
            Arc::clone(&inheritance),
            Arc::clone(&active),
            Arc::clone(&cache),
            Arc::clone(&artifacts),
            probe,
        ));
        let validator = Arc::new(ThemeValidator::new(
            Arc::clone(&manifests),
            Arc::clone(&inheritance),
            Arc::clone(&resolver),
            probe,
            options.required_templates.clone(),
            options.runtime_version.clone(),
        ));
        let warmup = (!options.warmup_templates.is_empty()).then(|| WarmupPlan {
            templates: options.warmup_templates.clone(),
            artifacts: Arc::clone(&artifacts),
        });
        let activator = ThemeActivator::new(
            Arc::clone(&active),
            Arc::clone(&settings),
            helpers,
            Arc::clone(&cache),
            Arc::clone(&validator),
            Arc::clone(&inheritance),
            warmup,
        );
        let transfer = Arc::new(ConfigTransfer::new(
            Arc::clone(&inheritance),
            Arc::clone(&settings),
        ));
        let customizer = Arc::new(ThemeCustomizer::new(Arc::clone(&transfer), settings));

        info!(
            target = "application::engine",
            root = %options.layout.root().display(),
            active = %active.get(),
            cache_mode = ?options.cache.mode,
            "theme engine ready"
        );

        Self {
            options,
            cache,
            manifests,
            inheritance,
            active,
            resolver,
            validator,
            activator,
            transfer,
            customizer,
            artifacts,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<ThemeCache> {
        &self.cache
    }

    pub fn manifests(&self) -> &Arc<ManifestLoader> {
        &self.manifests
    }

    pub fn inheritance(&self) -> &Arc<InheritanceResolver> {
        &self.inheritance
    }

    pub fn resolver(&self) -> &Arc<TemplateResolver> {
        &self.resolver
    }

    pub fn validator(&self) -> &Arc<ThemeValidator> {
        &self.validator
    }

    pub fn activator(&self) -> &ThemeActivator {
        &self.activator
    }

    pub fn transfer(&self) -> &ConfigTransfer {
        &self.transfer
    }

    pub fn customizer(&self) -> &Arc<ThemeCustomizer> {
        &self.customizer
    }

    pub fn active_theme(&self) -> String {
        self.active.get()
    }

    /// Directories under the themes root that carry a manifest, sorted.
    pub async fn list_themes(&self) -> Result<Vec<String>, InfraError> {
        let root = self.options.layout.root();
        let entries = match self.options.probe.list_dir(root).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut themes = Vec::new();
        for entry in entries.into_iter().filter(|entry| entry.is_dir) {
            if self.manifests.locate(&entry.name).await.is_some() {
                themes.push(entry.name);
            }
        }
        Ok(themes)
    }

    pub async fn hierarchy(&self, theme: &str) -> Result<Vec<String>, ThemeError> {
        self.inheritance.hierarchy(theme).await
    }

    pub async fn merged_config(&self, theme: &str) -> Result<ThemeManifest, ThemeError> {
        self.inheritance.merged_config(theme).await
    }

    pub async fn active_config(&self) -> Result<ThemeManifest, ThemeError> {
        self.merged_config(&self.active.get()).await
    }

    pub async fn find_template(
        &self,
        kind: ContentKind,
        params: &TemplateParams,
    ) -> Result<Option<String>, ThemeError> {
        self.resolver.find_template(kind, params).await
    }

    /// Whether the active theme (with inherited flags) declares `feature`.
    pub async fn theme_supports(&self, feature: &str) -> Result<bool, ThemeError> {
        Ok(self.active_config().await?.supports.supports(feature))
    }

    /// Public URL of an asset shipped by the active theme.
    pub fn asset_url(&self, path: &str) -> String {
        format!(
            "{}/themes/{}/assets/{}",
            self.options.asset_base_url.trim_end_matches('/'),
            self.active.get(),
            path.trim_start_matches('/')
        )
    }

    pub async fn validate(&self, theme: &str) -> ValidationReport {
        self.validator.validate(theme).await
    }

    pub async fn activate(&self, theme: &str) -> Result<ActivationOutcome, ThemeError> {
        self.activator.activate(theme).await
    }

    /// Warm the configured templates of `theme` and wait for the result.
    pub async fn warmup(&self, theme: &str) -> WarmupReport {
        self.cache
            .warmup(theme, &self.options.warmup_templates, self.artifacts.as_ref())
            .await
    }

    /// Same as [`warmup`](Self::warmup) on a background task.
    pub fn spawn_warmup(&self, theme: &str) -> JoinHandle<WarmupReport> {
        activation::spawn_warmup(
            Arc::clone(&self.cache),
            WarmupPlan {
                templates: self.options.warmup_templates.clone(),
                artifacts: Arc::clone(&self.artifacts),
            },
            theme.to_string(),
        )
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn reset_stats(&self) {
        self.cache.reset_stats();
    }
}
