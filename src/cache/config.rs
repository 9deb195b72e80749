//! Theme cache configuration.
//!
//! Controlled via the `[cache]` table of `vellum.toml`.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_MAX_TEMPLATES: usize = 100;

/// `development` turns every cache read into a miss so edits show up live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Production,
    Development,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(CacheMode::Production),
            "development" | "dev" => Ok(CacheMode::Development),
            other => Err(format!(
                "unknown cache mode `{other}` (expected production|development)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThemeCacheConfig {
    pub mode: CacheMode,
    /// Maximum age of a template or config entry.
    pub ttl: Duration,
    /// Maximum number of compiled templates kept.
    pub max_templates: usize,
    /// Spawn a warmup of the common templates after every activation.
    pub warmup_on_activate: bool,
}

impl Default for ThemeCacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Production,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_templates: DEFAULT_MAX_TEMPLATES,
            warmup_on_activate: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for ThemeCacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            mode: settings.mode,
            ttl: settings.ttl,
            max_templates: settings.max_templates.get(),
            warmup_on_activate: settings.warmup_on_activate,
        }
    }
}

impl ThemeCacheConfig {
    pub fn development() -> Self {
        Self {
            mode: CacheMode::Development,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode == CacheMode::Production
    }

    /// Template capacity, clamped to 1 if zero.
    pub fn max_templates_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_templates).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ThemeCacheConfig::default();
        assert!(config.is_enabled());
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.max_templates, 100);
        assert!(config.warmup_on_activate);
    }

    #[test]
    fn development_mode_disables_cache() {
        assert!(!ThemeCacheConfig::development().is_enabled());
    }

    #[test]
    fn parses_mode_aliases() {
        assert_eq!("DEV".parse(), Ok(CacheMode::Development));
        assert_eq!("production".parse(), Ok(CacheMode::Production));
        assert!("staging".parse::<CacheMode>().is_err());
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = ThemeCacheConfig {
            max_templates: 0,
            ..Default::default()
        };
        assert_eq!(config.max_templates_non_zero().get(), 1);
    }
}
