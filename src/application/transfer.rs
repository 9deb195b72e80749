//! Custom setting reads and writes plus export/import of a theme's stored
//! configuration between installations.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

use crate::domain::error::ThemeError;

use super::inheritance::InheritanceResolver;
use super::repos::{SettingsError, SettingsStore, custom_setting_key, custom_setting_prefix};

pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Theme(#[from] ThemeError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("invalid export document: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTheme {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Portable snapshot of one theme's stored custom settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeConfigExport {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub exported_at: String,
    #[serde(default)]
    pub theme: ExportedTheme,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl ThemeConfigExport {
    pub fn parse(raw: &str) -> Result<Self, TransferError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, TransferError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Replace values that are already stored.
    pub overwrite: bool,
    pub skip_settings: Vec<String>,
    /// Require the theme to be installed and compare its version.
    pub validate_theme: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            skip_settings: Vec::new(),
            validate_theme: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub success: bool,
    pub imported: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportCheck {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
}

pub struct ConfigTransfer {
    inheritance: Arc<InheritanceResolver>,
    settings: Arc<dyn SettingsStore>,
}

impl ConfigTransfer {
    pub fn new(inheritance: Arc<InheritanceResolver>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            inheritance,
            settings,
        }
    }

    /// Values stored for `theme`, keyed without the `theme.<name>.` prefix.
    pub async fn stored_settings(
        &self,
        theme: &str,
    ) -> Result<BTreeMap<String, Value>, SettingsError> {
        let prefix = custom_setting_prefix(theme);
        let mut values = BTreeMap::new();
        for key in self.settings.keys_with_prefix(&prefix).await? {
            let Some(short) = key.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(value) = self.settings.get(&key).await? {
                values.insert(short.to_string(), value);
            }
        }
        Ok(values)
    }

    /// Every declared custom setting with its effective value: the stored
    /// one when present, the merged default otherwise.
    pub async fn custom_settings(
        &self,
        theme: &str,
    ) -> Result<BTreeMap<String, Value>, TransferError> {
        let merged = self.inheritance.merged_config(theme).await?;
        let mut values: BTreeMap<String, Value> = merged
            .config
            .custom
            .iter()
            .map(|(key, definition)| (key.clone(), definition.default_value()))
            .collect();
        values.extend(self.stored_settings(theme).await?);
        Ok(values)
    }

    pub async fn update_custom_settings(
        &self,
        theme: &str,
        values: &BTreeMap<String, Value>,
    ) -> Result<(), SettingsError> {
        for (key, value) in values {
            self.settings
                .set(&custom_setting_key(theme, key), value.clone())
                .await?;
        }
        info!(
            target = "application::transfer",
            theme,
            updated = values.len(),
            "custom settings updated"
        );
        Ok(())
    }

    pub async fn export_theme_config(
        &self,
        theme: &str,
    ) -> Result<ThemeConfigExport, TransferError> {
        let manifest = self.inheritance.manifests().load(theme).await?;
        let settings = self.stored_settings(theme).await?;
        let now = OffsetDateTime::now_utc();
        let exported_at = now.format(&Rfc3339).unwrap_or_else(|_| now.to_string());

        Ok(ThemeConfigExport {
            version: EXPORT_FORMAT_VERSION.to_string(),
            exported_at,
            theme: ExportedTheme {
                name: theme.to_string(),
                version: manifest.version.clone(),
                display_name: Some(manifest.display_name.clone()).filter(|name| !name.is_empty()),
            },
            settings,
            metadata: BTreeMap::new(),
        })
    }

    pub async fn import_theme_config(
        &self,
        export: &ThemeConfigExport,
        options: &ImportOptions,
    ) -> ImportResult {
        let mut result = ImportResult::default();
        if export.version != EXPORT_FORMAT_VERSION {
            result
                .errors
                .push(format!("unsupported export version `{}`", export.version));
            return result;
        }

        let theme = export.theme.name.as_str();
        if options.validate_theme {
            match self.inheritance.manifests().load(theme).await {
                Ok(manifest) if manifest.version != export.theme.version => {
                    result.errors.push(format!(
                        "theme version mismatch: export is for {}, installed is {}",
                        export.theme.version, manifest.version
                    ));
                }
                Ok(_) => {}
                Err(err) => {
                    result
                        .errors
                        .push(format!("theme `{theme}` is not installed: {err}"));
                    return result;
                }
            }
        }

        let existing = match self.stored_settings(theme).await {
            Ok(existing) => existing,
            Err(err) => {
                result.errors.push(err.to_string());
                return result;
            }
        };

        for (key, value) in &export.settings {
            if options.skip_settings.contains(key)
                || (!options.overwrite && existing.contains_key(key))
            {
                result.skipped.push(key.clone());
                continue;
            }
            match self
                .settings
                .set(&custom_setting_key(theme, key), value.clone())
                .await
            {
                Ok(()) => result.imported.push(key.clone()),
                Err(err) => {
                    warn!(
                        target = "application::transfer",
                        theme,
                        key = %key,
                        error = %err,
                        "failed to import setting"
                    );
                    result
                        .errors
                        .push(format!("failed to import setting `{key}`: {err}"));
                }
            }
        }

        result.success = result.errors.is_empty();
        info!(
            target = "application::transfer",
            theme,
            imported = result.imported.len(),
            skipped = result.skipped.len(),
            errors = result.errors.len(),
            "theme configuration imported"
        );
        result
    }

    /// Dry-run check of an export against the installed theme.
    pub async fn validate_export(&self, export: &ThemeConfigExport) -> ExportCheck {
        let mut check = ExportCheck::default();
        if export.version.trim().is_empty() {
            check.errors.push("missing export version".to_string());
        }
        if export.settings.is_empty() {
            check.warnings.push("no settings to import".to_string());
        }

        let theme = export.theme.name.trim();
        if theme.is_empty() {
            check.errors.push("missing theme name".to_string());
        } else {
            match self.inheritance.merged_config(theme).await {
                Err(err) => check
                    .errors
                    .push(format!("theme `{theme}` is not installed: {err}")),
                Ok(merged) => {
                    if merged.version != export.theme.version {
                        check.warnings.push(format!(
                            "theme version mismatch: export is for {}, installed is {}",
                            export.theme.version, merged.version
                        ));
                    }
                    for key in export.settings.keys() {
                        if !merged.config.custom.contains_key(key) {
                            check.warnings.push(format!(
                                "setting `{key}` is not declared by the installed theme"
                            ));
                        }
                    }
                }
            }
        }

        check.valid = check.errors.is_empty();
        check
    }
}

/// Key-level difference between two exports, from `before` to `after`.
pub fn compare_exports(before: &ThemeConfigExport, after: &ThemeConfigExport) -> ExportDiff {
    let mut diff = ExportDiff::default();
    for (key, value) in &before.settings {
        match after.settings.get(key) {
            None => diff.removed.push(key.clone()),
            Some(other) if other == value => diff.unchanged.push(key.clone()),
            Some(_) => diff.modified.push(key.clone()),
        }
    }
    diff.added = after
        .settings
        .keys()
        .filter(|key| !before.settings.contains_key(*key))
        .cloned()
        .collect();
    diff
}

/// `<theme>-theme-config-<YYYY-MM-DD>.json`
pub fn export_filename(theme: &str, date: Date) -> String {
    let day = date
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string());
    format!("{theme}-theme-config-{day}.json")
}
