//! Manifest loading.
//!
//! Reads `theme.json` (or `theme.toml`) from a theme root, checks the
//! required identity fields and parks the parsed manifest in the config cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::cache::ThemeCache;
use crate::domain::error::ThemeError;
use crate::domain::kind::is_safe_segment;
use crate::domain::layout::ThemeLayout;
use crate::domain::manifest::{REQUIRED_MANIFEST_FIELDS, ThemeManifest};
use crate::infra::fs::FileProbe;

/// A manifest as read from disk, before typed deserialization.
#[derive(Debug, Clone)]
pub struct RawManifest {
    pub path: PathBuf,
    pub value: Value,
}

impl RawManifest {
    /// Required fields that are absent, null or blank.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        missing_required_fields(&self.value)
    }

    pub fn into_manifest(self, theme: &str) -> Result<ThemeManifest, ThemeError> {
        let mut manifest: ThemeManifest = serde_json::from_value(self.value)
            .map_err(|err| ThemeError::invalid_manifest(theme, err.to_string()))?;
        manifest.normalize_keys();
        Ok(manifest)
    }
}

pub fn missing_required_fields(value: &Value) -> Vec<&'static str> {
    REQUIRED_MANIFEST_FIELDS
        .iter()
        .copied()
        .filter(|field| {
            let present = value.get(*field).or_else(|| match *field {
                "displayName" => value.get("display_name"),
                _ => None,
            });
            match present {
                None | Some(Value::Null) => true,
                Some(Value::String(text)) => text.trim().is_empty(),
                Some(_) => false,
            }
        })
        .collect()
}

pub struct ManifestLoader {
    layout: ThemeLayout,
    probe: FileProbe,
    cache: Arc<ThemeCache>,
}

impl ManifestLoader {
    pub fn new(layout: ThemeLayout, probe: FileProbe, cache: Arc<ThemeCache>) -> Self {
        Self {
            layout,
            probe,
            cache,
        }
    }

    pub fn layout(&self) -> &ThemeLayout {
        &self.layout
    }

    /// Cached manifest of `theme`, parsing it from disk on a miss.
    pub async fn load(&self, theme: &str) -> Result<Arc<ThemeManifest>, ThemeError> {
        if let Some(manifest) = self.cache.get_cached_config(theme).await {
            return Ok(manifest);
        }

        let path = self.locate_or_not_found(theme).await?;
        let digest = self.cache.file_digest(&path).await;
        let raw = self.read_at(theme, path).await?;
        let missing = raw.missing_required_fields();
        if !missing.is_empty() {
            return Err(ThemeError::invalid_manifest(
                theme,
                format!("missing required fields: {}", missing.join(", ")),
            ));
        }

        let source = digest.map(|digest| (raw.path.clone(), digest));
        let manifest = Arc::new(raw.into_manifest(theme)?);
        self.cache
            .cache_config_with_source(theme, Arc::clone(&manifest), source);
        debug!(target = "application::manifest", theme, "manifest loaded");
        Ok(manifest)
    }

    /// First manifest file present in the theme root.
    pub async fn locate(&self, theme: &str) -> Option<PathBuf> {
        if !is_safe_segment(theme) {
            return None;
        }
        for candidate in self.layout.manifest_candidates(theme) {
            if self.probe.is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    async fn locate_or_not_found(&self, theme: &str) -> Result<PathBuf, ThemeError> {
        self.locate(theme)
            .await
            .ok_or_else(|| ThemeError::manifest_not_found(theme, self.layout.theme_dir(theme)))
    }

    /// Read and parse the manifest without consulting or filling the cache.
    pub async fn read_raw(&self, theme: &str) -> Result<RawManifest, ThemeError> {
        let path = self.locate_or_not_found(theme).await?;
        self.read_at(theme, path).await
    }

    async fn read_at(&self, theme: &str, path: PathBuf) -> Result<RawManifest, ThemeError> {
        let body = self.probe.read_to_string(&path).await.map_err(|err| {
            if err.is_not_found() {
                ThemeError::manifest_not_found(theme, path.clone())
            } else {
                ThemeError::invalid_manifest(theme, err.to_string())
            }
        })?;

        let value = parse_manifest(&path, &body)
            .map_err(|reason| ThemeError::invalid_manifest(theme, reason))?;
        if !value.is_object() {
            return Err(ThemeError::invalid_manifest(
                theme,
                "manifest must be an object",
            ));
        }
        Ok(RawManifest { path, value })
    }
}

fn parse_manifest(path: &Path, body: &str) -> Result<Value, String> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str::<Value>(body).map_err(|err| err.to_string())
    } else {
        serde_json::from_str::<Value>(body).map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::cache::ThemeCacheConfig;

    fn loader(dir: &TempDir) -> ManifestLoader {
        let layout = ThemeLayout::new(dir.path(), "tmpl");
        let cache = Arc::new(ThemeCache::new(
            ThemeCacheConfig::default(),
            layout.clone(),
            FileProbe::default(),
        ));
        ManifestLoader::new(layout, FileProbe::default(), cache)
    }

    fn write(dir: &TempDir, theme: &str, file: &str, body: &str) {
        let root = dir.path().join(theme);
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::write(root.join(file), body).expect("write");
    }

    #[test]
    fn blank_required_fields_count_as_missing() {
        let value = json!({ "name": "x", "display_name": "X", "version": " " });
        assert_eq!(missing_required_fields(&value), vec!["version", "description"]);
    }

    #[tokio::test]
    async fn loads_json_manifest() {
        let dir = TempDir::new().expect("tempdir");
        write(
            &dir,
            "base",
            "theme.json",
            r#"{"name":"base","displayName":"Base","version":"1.0.0","description":"root"}"#,
        );

        let manifest = loader(&dir).load("base").await.expect("manifest");
        assert_eq!(manifest.display_name, "Base");
    }

    #[tokio::test]
    async fn loads_toml_manifest() {
        let dir = TempDir::new().expect("tempdir");
        write(
            &dir,
            "paper",
            "theme.toml",
            "name = \"paper\"\ndisplayName = \"Paper\"\nversion = \"0.2.0\"\ndescription = \"toml theme\"\nparent = \"base\"\n",
        );

        let manifest = loader(&dir).load("paper").await.expect("manifest");
        assert_eq!(manifest.parent.as_deref(), Some("base"));
    }

    #[tokio::test]
    async fn missing_directory_is_manifest_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = loader(&dir).load("ghost").await.expect_err("missing");
        assert!(matches!(err, ThemeError::ManifestNotFound { .. }));
    }

    #[tokio::test]
    async fn malformed_or_incomplete_manifest_is_invalid() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "broken", "theme.json", "{ not json");
        write(&dir, "partial", "theme.json", r#"{"name":"partial"}"#);

        let loader = loader(&dir);
        assert!(matches!(
            loader.load("broken").await,
            Err(ThemeError::InvalidManifest { .. })
        ));
        let err = loader.load("partial").await.expect_err("incomplete");
        assert!(err.to_string().contains("displayName"));
    }

    #[tokio::test]
    async fn edited_manifest_is_reparsed_on_next_load() {
        let dir = TempDir::new().expect("tempdir");
        let body = |description: &str| {
            json!({
                "name": "base",
                "displayName": "Base",
                "version": "1.0.0",
                "description": description
            })
            .to_string()
        };
        write(&dir, "base", "theme.json", &body("first"));
        let loader = loader(&dir);

        assert_eq!(loader.load("base").await.expect("manifest").description, "first");
        write(&dir, "base", "theme.json", &body("second, longer"));
        assert_eq!(
            loader.load("base").await.expect("manifest").description,
            "second, longer"
        );
    }

    #[tokio::test]
    async fn traversal_names_are_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = loader(&dir).load("../etc").await.expect_err("rejected");
        assert!(matches!(err, ThemeError::ManifestNotFound { .. }));
    }
}
