//! Theme manifest model.
//!
//! A manifest is the declaration file at the root of every theme directory
//! (`theme.json` or `theme.toml`). Field names follow the camelCase spelling
//! used by theme authors; the snake_case spellings found in older themes are
//! accepted as aliases.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Manifest fields a theme must declare for the manifest to load.
pub const REQUIRED_MANIFEST_FIELDS: &[&str] = &["name", "displayName", "version", "description"];

const DEFAULT_POSTS_PER_PAGE: u32 = 10;

/// Identity and capability declaration for one theme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "display_name")]
    pub display_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Minimum runtime version the theme was written against, e.g. `>=0.3.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
    #[serde(default)]
    pub config: ThemeConfig,
    #[serde(default)]
    pub supports: Supports,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partials: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<Screenshots>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Screenshots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

impl Screenshots {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.desktop.iter().chain(self.mobile.iter()).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeConfig {
    #[serde(default, alias = "posts_per_page", skip_serializing_if = "Option::is_none")]
    pub posts_per_page: Option<u32>,
    #[serde(default, alias = "image_sizes", skip_serializing_if = "BTreeMap::is_empty")]
    pub image_sizes: BTreeMap<String, ImageSize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, CustomSettingDefinition>,
}

impl ThemeConfig {
    pub fn posts_per_page_or_default(&self) -> u32 {
        self.posts_per_page.unwrap_or(DEFAULT_POSTS_PER_PAGE)
    }
}

/// Capability flags. Unknown flags are kept in `extra` so themes can declare
/// features this crate does not model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supports {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<bool>,
    #[serde(default, alias = "custom_settings", skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets: Option<bool>,
    #[serde(default, alias = "post_formats", skip_serializing_if = "Option::is_none")]
    pub post_formats: Option<Vec<String>>,
    #[serde(default, alias = "custom_templates", skip_serializing_if = "Option::is_none")]
    pub custom_templates: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menus: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Supports {
    /// Whether the flag named `feature` is switched on. List-valued
    /// capabilities count as supported when non-empty.
    pub fn supports(&self, feature: &str) -> bool {
        match feature {
            "comments" => self.comments == Some(true),
            "customSettings" | "custom_settings" => self.custom_settings == Some(true),
            "widgets" => self.widgets == Some(true),
            "customTemplates" | "custom_templates" => self.custom_templates == Some(true),
            "postFormats" | "post_formats" => {
                self.post_formats.as_ref().is_some_and(|f| !f.is_empty())
            }
            "menus" => self.menus.as_ref().is_some_and(|m| !m.is_empty()),
            other => matches!(self.extra.get(other), Some(Value::Bool(true))),
        }
    }

    /// Key-by-key overlay: every flag the child declares wins, everything else
    /// is inherited.
    fn overlay(&mut self, child: &Supports) {
        if child.comments.is_some() {
            self.comments = child.comments;
        }
        if child.custom_settings.is_some() {
            self.custom_settings = child.custom_settings;
        }
        if child.widgets.is_some() {
            self.widgets = child.widgets;
        }
        if child.post_formats.is_some() {
            self.post_formats = child.post_formats.clone();
        }
        if child.custom_templates.is_some() {
            self.custom_templates = child.custom_templates;
        }
        if child.menus.is_some() {
            self.menus = child.menus.clone();
        }
        self.extra
            .extend(child.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// One configurable theme option.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSettingDefinition {
    /// Filled from the map key when the manifest is loaded.
    #[serde(default)]
    pub key: String,
    /// Raw declared type; see [`CustomSettingDefinition::kind`].
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
    #[serde(default, alias = "allowed_types", skip_serializing_if = "Option::is_none")]
    pub allowed_types: Option<Vec<String>>,
    #[serde(default, alias = "max_size", skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

impl CustomSettingDefinition {
    pub fn kind(&self) -> Result<SettingKind, SettingKindError> {
        match self.kind.as_deref() {
            None => Err(SettingKindError::Missing),
            Some(raw) => raw.parse(),
        }
    }

    /// Value written to the settings store when nothing is stored yet.
    pub fn default_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKind {
    Text,
    Textarea,
    Number,
    Color,
    Select,
    Boolean,
    Url,
    Image,
    ImageUpload,
    Range,
}

impl SettingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKind::Text => "text",
            SettingKind::Textarea => "textarea",
            SettingKind::Number => "number",
            SettingKind::Color => "color",
            SettingKind::Select => "select",
            SettingKind::Boolean => "boolean",
            SettingKind::Url => "url",
            SettingKind::Image => "image",
            SettingKind::ImageUpload => "image_upload",
            SettingKind::Range => "range",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, SettingKind::Number | SettingKind::Range)
    }
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingKindError {
    #[error("missing type")]
    Missing,
    #[error("unknown type `{0}`")]
    Unknown(String),
}

impl FromStr for SettingKind {
    type Err = SettingKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(SettingKind::Text),
            "textarea" => Ok(SettingKind::Textarea),
            "number" => Ok(SettingKind::Number),
            "color" => Ok(SettingKind::Color),
            "select" => Ok(SettingKind::Select),
            "boolean" => Ok(SettingKind::Boolean),
            "url" => Ok(SettingKind::Url),
            "image" => Ok(SettingKind::Image),
            "image_upload" | "imageUpload" => Ok(SettingKind::ImageUpload),
            "range" => Ok(SettingKind::Range),
            other => Err(SettingKindError::Unknown(other.to_string())),
        }
    }
}

impl ThemeManifest {
    /// Fill each custom setting's `key` from the map key it was declared under.
    pub fn normalize_keys(&mut self) {
        for (key, definition) in self.config.custom.iter_mut() {
            if definition.key != *key {
                definition.key = key.clone();
            }
        }
    }

    /// Fold a more specific manifest over this one.
    ///
    /// Top-level scalars are replaced wholesale. `config.custom`, `supports`,
    /// `templates` and `partials` are merged key by key so the child can
    /// override a single entry without dropping its siblings.
    pub fn overlay(&mut self, child: &ThemeManifest) {
        self.name = child.name.clone();
        self.display_name = child.display_name.clone();
        self.version = child.version.clone();
        self.description = child.description.clone();
        self.parent = child.parent.clone();
        if child.author.is_some() {
            self.author = child.author.clone();
        }
        if child.license.is_some() {
            self.license = child.license.clone();
        }
        if child.requires.is_some() {
            self.requires = child.requires.clone();
        }
        if child.screenshots.is_some() {
            self.screenshots = child.screenshots.clone();
        }

        if child.config.posts_per_page.is_some() {
            self.config.posts_per_page = child.config.posts_per_page;
        }
        if !child.config.image_sizes.is_empty() {
            self.config.image_sizes = child.config.image_sizes.clone();
        }
        self.config.custom.extend(
            child
                .config
                .custom
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        self.supports.overlay(&child.supports);
        self.templates
            .extend(child.templates.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.partials
            .extend(child.partials.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn manifest(value: Value) -> ThemeManifest {
        let mut manifest: ThemeManifest = serde_json::from_value(value).expect("valid manifest");
        manifest.normalize_keys();
        manifest
    }

    #[test]
    fn parses_camel_and_snake_case_fields() {
        let parsed = manifest(json!({
            "name": "base",
            "displayName": "Base",
            "version": "1.0.0",
            "description": "root theme",
            "config": {
                "posts_per_page": 12,
                "imageSizes": { "thumb": { "width": 150, "height": 150 } },
                "custom": { "accent": { "type": "color", "default": "#fff" } }
            },
            "supports": { "comments": true, "menus": ["primary"], "darkMode": true }
        }));

        assert_eq!(parsed.config.posts_per_page, Some(12));
        assert_eq!(parsed.config.image_sizes["thumb"].width, 150);
        assert_eq!(parsed.config.custom["accent"].key, "accent");
        assert_eq!(parsed.config.custom["accent"].kind(), Ok(SettingKind::Color));
        assert!(parsed.supports.supports("comments"));
        assert!(parsed.supports.supports("menus"));
        assert!(parsed.supports.supports("darkMode"));
        assert!(!parsed.supports.supports("widgets"));
    }

    #[test]
    fn setting_kind_reports_missing_and_unknown() {
        let missing = CustomSettingDefinition::default();
        assert_eq!(missing.kind(), Err(SettingKindError::Missing));

        let unknown = CustomSettingDefinition {
            kind: Some("slider".to_string()),
            ..Default::default()
        };
        assert_eq!(
            unknown.kind(),
            Err(SettingKindError::Unknown("slider".to_string()))
        );
        assert!("range".parse::<SettingKind>().expect("range").is_numeric());
    }

    #[test]
    fn overlay_merges_nested_maps_key_by_key() {
        let mut base = manifest(json!({
            "name": "base",
            "displayName": "Base",
            "version": "1.0.0",
            "description": "root",
            "license": "MIT",
            "config": {
                "postsPerPage": 10,
                "custom": {
                    "accent": { "type": "color", "default": "#000" },
                    "logo": { "type": "image" }
                }
            },
            "supports": { "comments": true, "widgets": true },
            "templates": { "home": "landing.tmpl" }
        }));
        let child = manifest(json!({
            "name": "child",
            "displayName": "Child",
            "version": "2.0.0",
            "description": "leaf",
            "parent": "base",
            "config": { "custom": { "accent": { "type": "color", "default": "#f00" } } },
            "supports": { "comments": false },
            "templates": { "post": "article.tmpl" }
        }));

        base.overlay(&child);

        assert_eq!(base.name, "child");
        assert_eq!(base.parent.as_deref(), Some("base"));
        assert_eq!(base.license.as_deref(), Some("MIT"));
        assert_eq!(base.config.posts_per_page, Some(10));
        assert_eq!(base.config.custom["accent"].default, Some(json!("#f00")));
        assert!(base.config.custom.contains_key("logo"));
        assert_eq!(base.supports.comments, Some(false));
        assert_eq!(base.supports.widgets, Some(true));
        assert_eq!(base.templates.len(), 2);
    }
}
