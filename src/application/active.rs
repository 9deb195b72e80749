use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{rw_read, rw_write};

use super::repos::{ACTIVE_THEME_KEY, SettingsStore};

const SOURCE: &str = "application::active";

/// In-process pointer to the active theme.
///
/// Readers take a clone of the current name; only the activation state
/// machine writes it.
#[derive(Debug)]
pub struct ActiveTheme {
    current: RwLock<Arc<str>>,
}

impl ActiveTheme {
    pub fn new(theme: impl Into<Arc<str>>) -> Self {
        Self {
            current: RwLock::new(theme.into()),
        }
    }

    /// Seed from the persisted pointer, falling back to `default_theme`.
    pub async fn restore(store: &dyn SettingsStore, default_theme: &str) -> Self {
        let theme = match store.get(ACTIVE_THEME_KEY).await {
            Ok(Some(Value::String(name))) if !name.trim().is_empty() => name,
            Ok(_) => default_theme.to_string(),
            Err(err) => {
                warn!(
                    target = "application::active",
                    error = %err,
                    fallback = default_theme,
                    "could not read active theme; using default"
                );
                default_theme.to_string()
            }
        };
        info!(target = "application::active", theme = %theme, "active theme restored");
        Self::new(theme)
    }

    pub fn get(&self) -> String {
        rw_read(&self.current, SOURCE, "get").to_string()
    }

    pub(crate) fn set(&self, theme: &str) {
        *rw_write(&self.current, SOURCE, "set") = Arc::from(theme);
    }
}
