//! Template hierarchy resolution.
//!
//! Walks the active theme's inheritance chain child first. Inside one theme
//! every candidate is tried from most to least specific before the search
//! moves on to the parent, so anything a child defines beats the parent.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::cache::{TemplateHandle, ThemeCache};
use crate::domain::error::ThemeError;
use crate::domain::kind::{ContentKind, TemplateParams, is_safe_segment};
use crate::domain::layout::ThemeLayout;
use crate::domain::manifest::ThemeManifest;
use crate::infra::fs::FileProbe;

use super::active::ActiveTheme;
use super::inheritance::InheritanceResolver;
use super::repos::{ArtifactError, ArtifactLoader};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTemplate {
    /// Candidate name that matched, e.g. `post-hello` or `index`.
    pub name: String,
    /// Theme in the chain that provided the file.
    pub theme: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    pub resolved: ResolvedTemplate,
    pub handle: TemplateHandle,
}

#[derive(Debug, Error)]
pub enum TemplateLoadError {
    #[error(transparent)]
    Theme(#[from] ThemeError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Template,
    Partial,
    Page,
}

pub struct TemplateResolver {
    inheritance: Arc<InheritanceResolver>,
    active: Arc<ActiveTheme>,
    cache: Arc<ThemeCache>,
    artifacts: Arc<dyn ArtifactLoader>,
    probe: FileProbe,
}

impl TemplateResolver {
    pub fn new(
        inheritance: Arc<InheritanceResolver>,
        active: Arc<ActiveTheme>,
        cache: Arc<ThemeCache>,
        artifacts: Arc<dyn ArtifactLoader>,
        probe: FileProbe,
    ) -> Self {
        Self {
            inheritance,
            active,
            cache,
            artifacts,
            probe,
        }
    }

    fn layout(&self) -> &ThemeLayout {
        self.inheritance.manifests().layout()
    }

    /// Name of the template that renders `kind` under the active theme.
    pub async fn find_template(
        &self,
        kind: ContentKind,
        params: &TemplateParams,
    ) -> Result<Option<String>, ThemeError> {
        Ok(self
            .resolve_template(kind, params)
            .await?
            .map(|resolved| resolved.name))
    }

    pub async fn resolve_template(
        &self,
        kind: ContentKind,
        params: &TemplateParams,
    ) -> Result<Option<ResolvedTemplate>, ThemeError> {
        let theme = self.active.get();
        self.resolve_template_in(&theme, kind, params).await
    }

    /// Same as [`resolve_template`](Self::resolve_template) for an explicit theme.
    pub async fn resolve_template_in(
        &self,
        theme: &str,
        kind: ContentKind,
        params: &TemplateParams,
    ) -> Result<Option<ResolvedTemplate>, ThemeError> {
        let chain = self.inheritance.chain(theme).await?;
        let candidates = kind.candidates(params);
        let resolved = self.search(&chain, &candidates, Slot::Template).await;
        if resolved.is_none() {
            debug!(
                target = "application::hierarchy",
                theme,
                kind = %kind,
                "no template matched"
            );
        }
        Ok(resolved)
    }

    /// First of `names` present anywhere in `theme`'s chain.
    pub async fn resolve_named_in(
        &self,
        theme: &str,
        names: &[String],
    ) -> Result<Option<ResolvedTemplate>, ThemeError> {
        let chain = self.inheritance.chain(theme).await?;
        Ok(self.search(&chain, names, Slot::Template).await)
    }

    pub async fn load_template(
        &self,
        kind: ContentKind,
        params: &TemplateParams,
    ) -> Result<Option<LoadedTemplate>, TemplateLoadError> {
        match self.resolve_template(kind, params).await? {
            Some(resolved) => Ok(Some(self.load_resolved(resolved).await?)),
            None => Ok(None),
        }
    }

    pub async fn load_partial(&self, name: &str) -> Result<Option<LoadedTemplate>, TemplateLoadError> {
        let chain = self.inheritance.chain(&self.active.get()).await?;
        match self.search(&chain, &[name.to_string()], Slot::Partial).await {
            Some(resolved) => Ok(Some(self.load_resolved(resolved).await?)),
            None => Ok(None),
        }
    }

    /// Custom page template from `templates/pages/`, falling back to the
    /// regular `page` hierarchy.
    pub async fn load_page_template(
        &self,
        custom: Option<&str>,
        params: &TemplateParams,
    ) -> Result<Option<LoadedTemplate>, TemplateLoadError> {
        if let Some(custom) = custom {
            let chain = self.inheritance.chain(&self.active.get()).await?;
            if let Some(resolved) = self.search(&chain, &[custom.to_string()], Slot::Page).await {
                return Ok(Some(self.load_resolved(resolved).await?));
            }
        }
        self.load_template(ContentKind::Page, params).await
    }

    async fn load_resolved(&self, resolved: ResolvedTemplate) -> Result<LoadedTemplate, ArtifactError> {
        if let Some(handle) = self.cache.get_cached_template(&resolved.path).await {
            return Ok(LoadedTemplate { resolved, handle });
        }
        let digest = self.cache.file_digest(&resolved.path).await;
        let handle = self.artifacts.load(&resolved.path).await?;
        self.cache
            .cache_template_with_digest(&resolved.path, handle.clone(), digest);
        Ok(LoadedTemplate { resolved, handle })
    }

    async fn search(
        &self,
        chain: &[(String, Arc<ThemeManifest>)],
        names: &[String],
        slot: Slot,
    ) -> Option<ResolvedTemplate> {
        for (theme, manifest) in chain {
            for name in names {
                let Some(path) = self.slot_path(theme, manifest, name, slot) else {
                    continue;
                };
                if self.probe.is_file(&path).await {
                    return Some(ResolvedTemplate {
                        name: name.clone(),
                        theme: theme.clone(),
                        path,
                    });
                }
            }
        }
        None
    }

    fn slot_path(
        &self,
        theme: &str,
        manifest: &ThemeManifest,
        name: &str,
        slot: Slot,
    ) -> Option<PathBuf> {
        if !is_safe_segment(name) {
            return None;
        }
        let layout = self.layout();
        match slot {
            Slot::Template => Some(match manifest.templates.get(name) {
                Some(mapped) => layout.templates_dir(theme).join(relative(mapped)?),
                None => layout.template_path(theme, name),
            }),
            Slot::Partial => Some(match manifest.partials.get(name) {
                Some(mapped) => layout.partials_dir(theme).join(relative(mapped)?),
                None => layout.partial_path(theme, name),
            }),
            Slot::Page => Some(
                layout
                    .page_templates_dir(theme)
                    .join(layout.file_name(name)),
            ),
        }
    }
}

/// Manifest-mapped file names must stay inside their directory.
fn relative(mapped: &str) -> Option<&Path> {
    let path = Path::new(mapped);
    let contained = path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    contained.then_some(path)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::application::manifest::ManifestLoader;
    use crate::cache::ThemeCacheConfig;

    struct PathLoader;

    #[async_trait]
    impl ArtifactLoader for PathLoader {
        async fn load(&self, path: &Path) -> Result<TemplateHandle, ArtifactError> {
            Ok(TemplateHandle::new(path.to_path_buf()))
        }
    }

    struct Fixture {
        dir: TempDir,
        resolver: TemplateResolver,
        cache: Arc<ThemeCache>,
    }

    fn fixture(active: &str) -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let layout = ThemeLayout::new(dir.path(), "tmpl");
        let probe = FileProbe::default();
        let cache = Arc::new(ThemeCache::new(
            ThemeCacheConfig::default(),
            layout.clone(),
            probe,
        ));
        let manifests = Arc::new(ManifestLoader::new(layout, probe, Arc::clone(&cache)));
        let resolver = TemplateResolver::new(
            Arc::new(InheritanceResolver::new(manifests)),
            Arc::new(ActiveTheme::new(active)),
            Arc::clone(&cache),
            Arc::new(PathLoader),
            probe,
        );
        Fixture {
            dir,
            resolver,
            cache,
        }
    }

    impl Fixture {
        fn theme(&self, name: &str, parent: Option<&str>, extra: serde_json::Value) {
            let root = self.dir.path().join(name);
            std::fs::create_dir_all(root.join("templates")).expect("mkdir");
            let mut manifest = json!({
                "name": name,
                "displayName": name,
                "version": "1.0.0",
                "description": "fixture",
            });
            if let Some(parent) = parent {
                manifest["parent"] = json!(parent);
            }
            if let (Some(target), Some(source)) = (manifest.as_object_mut(), extra.as_object()) {
                target.extend(source.clone());
            }
            std::fs::write(root.join("theme.json"), manifest.to_string()).expect("manifest");
        }

        fn file(&self, theme: &str, relative: &str) {
            let path = self.dir.path().join(theme).join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir");
            }
            std::fs::write(path, relative).expect("write");
        }
    }

    #[tokio::test]
    async fn falls_back_through_candidates() {
        let fx = fixture("solo");
        fx.theme("solo", None, json!({}));
        fx.file("solo", "templates/index.tmpl");
        let params = TemplateParams::slug("hello");

        assert_eq!(
            fx.resolver.find_template(ContentKind::Post, &params).await.expect("find"),
            Some("index".to_string())
        );

        fx.file("solo", "templates/post.tmpl");
        assert_eq!(
            fx.resolver.find_template(ContentKind::Post, &params).await.expect("find"),
            Some("post".to_string())
        );
    }

    #[tokio::test]
    async fn child_generic_beats_parent_specific() {
        let fx = fixture("child");
        fx.theme("parent", None, json!({}));
        fx.theme("child", Some("parent"), json!({}));
        fx.file("parent", "templates/post-hello.tmpl");
        fx.file("child", "templates/index.tmpl");

        let resolved = fx
            .resolver
            .resolve_template(ContentKind::Post, &TemplateParams::slug("hello"))
            .await
            .expect("resolve")
            .expect("match");
        assert_eq!(resolved.name, "index");
        assert_eq!(resolved.theme, "child");
    }

    #[tokio::test]
    async fn no_match_is_none() {
        let fx = fixture("empty");
        fx.theme("empty", None, json!({}));
        assert_eq!(
            fx.resolver
                .find_template(ContentKind::Search, &TemplateParams::default())
                .await
                .expect("find"),
            None
        );
    }

    #[tokio::test]
    async fn manifest_mapping_overrides_file_name() {
        let fx = fixture("mapped");
        fx.theme("mapped", None, json!({ "templates": { "home": "landing.tmpl" } }));
        fx.file("mapped", "templates/landing.tmpl");

        let resolved = fx
            .resolver
            .resolve_template(ContentKind::Home, &TemplateParams::default())
            .await
            .expect("resolve")
            .expect("match");
        assert_eq!(resolved.name, "home");
        assert!(resolved.path.ends_with("templates/landing.tmpl"));
    }

    #[test]
    fn escaping_mappings_are_ignored() {
        assert!(relative("../outside.tmpl").is_none());
        assert!(relative("/abs.tmpl").is_none());
        assert!(relative("nested/ok.tmpl").is_some());
    }

    #[tokio::test]
    async fn load_template_caches_the_handle() {
        let fx = fixture("solo");
        fx.theme("solo", None, json!({}));
        fx.file("solo", "templates/home.tmpl");

        let first = fx
            .resolver
            .load_template(ContentKind::Home, &TemplateParams::default())
            .await
            .expect("load")
            .expect("template");
        let second = fx
            .resolver
            .load_template(ContentKind::Home, &TemplateParams::default())
            .await
            .expect("load")
            .expect("template");
        assert!(first.handle.same_as(&second.handle));
        assert_eq!(fx.cache.stats().templates.hits, 1);
    }

    #[tokio::test]
    async fn partials_resolve_through_parent() {
        let fx = fixture("child");
        fx.theme("parent", None, json!({}));
        fx.theme("child", Some("parent"), json!({}));
        fx.file("parent", "partials/header.tmpl");

        let partial = fx
            .resolver
            .load_partial("header")
            .await
            .expect("load")
            .expect("partial");
        assert_eq!(partial.resolved.theme, "parent");
        assert!(fx.resolver.load_partial("footer").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn page_template_falls_back_to_page_hierarchy() {
        let fx = fixture("solo");
        fx.theme("solo", None, json!({}));
        fx.file("solo", "templates/pages/landing.tmpl");
        fx.file("solo", "templates/page.tmpl");

        let custom = fx
            .resolver
            .load_page_template(Some("landing"), &TemplateParams::default())
            .await
            .expect("load")
            .expect("custom");
        assert_eq!(custom.resolved.name, "landing");

        let fallback = fx
            .resolver
            .load_page_template(Some("missing"), &TemplateParams::default())
            .await
            .expect("load")
            .expect("fallback");
        assert_eq!(fallback.resolved.name, "page");
    }
}
