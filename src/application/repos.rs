//! Contracts for the collaborators the theme engine depends on but does not
//! own: the settings key-value store, helper binding, and artifact loading.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::cache::TemplateHandle;

/// Settings key holding the active theme name.
pub const ACTIVE_THEME_KEY: &str = "active_theme";

/// Settings key for one custom value of one theme.
pub fn custom_setting_key(theme: &str, key: &str) -> String {
    format!("{}{key}", custom_setting_prefix(theme))
}

pub fn custom_setting_prefix(theme: &str) -> String {
    format!("theme.{theme}.")
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
    #[error("settings value for `{key}` is invalid: {message}")]
    InvalidValue { key: String, message: String },
}

impl SettingsError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, SettingsError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), SettingsError>;
    async fn delete(&self, key: &str) -> Result<(), SettingsError>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SettingsError>;

    async fn get_or(&self, key: &str, default: Value) -> Result<Value, SettingsError> {
        Ok(self.get(key).await?.unwrap_or(default))
    }
}

#[derive(Debug, Error)]
#[error("failed to load helpers for theme `{theme}`: {message}")]
pub struct HelperError {
    pub theme: String,
    pub message: String,
}

impl HelperError {
    pub fn new(theme: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            message: message.into(),
        }
    }
}

/// Binds per-theme helper functions. Called on activation and on rollback.
#[async_trait]
pub trait HelperLoader: Send + Sync {
    async fn load_helpers(&self, theme: &str) -> Result<(), HelperError>;
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found at {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to load artifact at {}: {message}", path.display())]
    Load { path: PathBuf, message: String },
}

impl ArtifactError {
    pub fn load(path: &Path, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Turns a template or partial file into an executable handle.
#[async_trait]
pub trait ArtifactLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<TemplateHandle, ArtifactError>;
}
