//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheMode;
use crate::domain::kind::is_safe_segment;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vellum";
const DEFAULT_THEMES_ROOT: &str = "themes";
const DEFAULT_TEMPLATE_EXTENSION: &str = "tmpl";
const DEFAULT_THEME: &str = "default";
const DEFAULT_IO_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;
const DEFAULT_CACHE_MAX_TEMPLATES: usize = 100;
const DEFAULT_SETTINGS_PATH: &str = "vellum-settings.json";
pub const DEFAULT_TEMPLATE_SET: &[&str] = &["home", "blog", "post", "page"];

/// Command-line arguments for the Vellum binary.
#[derive(Debug, Parser)]
#[command(name = "vellum", version, about = "Theme resolution and activation tool")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VELLUM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List installed themes and mark the active one.
    List,
    /// Validate a theme and print its errors and warnings.
    Validate(ValidateArgs),
    /// Print the inheritance chain of a theme.
    Hierarchy(ThemeArg),
    /// Resolve the template that renders a content kind.
    Resolve(ResolveArgs),
    /// Validate and activate a theme, rolling back on failure.
    Activate(ThemeArg),
    /// Export a theme's custom settings to a JSON file.
    Export(ExportArgs),
    /// Import theme custom settings from a JSON export.
    Import(ImportArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ThemeArg {
    /// Theme directory name.
    #[arg(value_name = "THEME")]
    pub theme: String,
}

#[derive(Debug, Args, Clone)]
pub struct ValidateArgs {
    #[arg(value_name = "THEME")]
    pub theme: String,

    /// Print the report as JSON.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    /// Content kind (post, page, home, category, tag, author, search, not_found, error).
    #[arg(value_name = "KIND")]
    pub kind: String,

    #[arg(long)]
    pub slug: Option<String>,

    #[arg(long)]
    pub id: Option<u64>,

    /// Resolve against this theme instead of the active one.
    #[arg(long)]
    pub theme: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    #[arg(value_name = "THEME")]
    pub theme: String,

    /// Path to the export file to write.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    /// Path to the export to import.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Replace values that are already stored.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub overwrite: bool,

    /// Setting key to leave untouched; repeatable.
    #[arg(long = "skip", value_name = "KEY")]
    pub skip: Vec<String>,

    /// Import even if the theme is not installed.
    #[arg(long = "no-validate", action = clap::ArgAction::SetTrue)]
    pub no_validate: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the directory holding installed themes.
    #[arg(long = "themes-root", value_name = "PATH", global = true)]
    pub themes_root: Option<PathBuf>,

    /// Override the cache mode (production|development).
    #[arg(long = "cache-mode", value_name = "MODE", global = true)]
    pub cache_mode: Option<String>,

    /// Override the settings store file.
    #[arg(long = "settings-path", value_name = "PATH", global = true)]
    pub settings_path: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub themes: ThemeSettings,
    pub cache: CacheSettings,
    pub settings_store: SettingsStoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ThemeSettings {
    pub root: PathBuf,
    pub template_extension: String,
    /// Active theme when nothing is persisted yet.
    pub default_theme: String,
    /// Version compared against a manifest's `requires`.
    pub runtime_version: String,
    /// Templates every theme hierarchy must provide.
    pub required_templates: Vec<String>,
    pub warmup_templates: Vec<String>,
    /// Upper bound on any single filesystem call.
    pub io_timeout: Duration,
    /// Prefix of public asset URLs, without trailing slash.
    pub asset_base_url: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub mode: CacheMode,
    pub ttl: Duration,
    pub max_templates: NonZeroUsize,
    pub warmup_on_activate: bool,
}

#[derive(Debug, Clone)]
pub struct SettingsStoreSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("VELLUM")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("themes.required_templates")
            .with_list_parse_key("themes.warmup_templates")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    themes: RawThemeSettings,
    cache: RawCacheSettings,
    settings_store: RawSettingsStoreSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(root) = overrides.themes_root.as_ref() {
            self.themes.root = Some(root.clone());
        }
        if let Some(mode) = overrides.cache_mode.as_ref() {
            self.cache.mode = Some(mode.clone());
        }
        if let Some(path) = overrides.settings_path.as_ref() {
            self.settings_store.path = Some(path.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            themes,
            cache,
            settings_store,
            logging,
        } = raw;

        Ok(Self {
            themes: build_theme_settings(themes)?,
            cache: build_cache_settings(cache)?,
            settings_store: build_settings_store_settings(settings_store)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_theme_settings(themes: RawThemeSettings) -> Result<ThemeSettings, LoadError> {
    let root = themes
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_THEMES_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("themes.root", "path must not be empty"));
    }

    let template_extension = themes
        .template_extension
        .map(|ext| ext.trim().trim_start_matches('.').to_string())
        .unwrap_or_else(|| DEFAULT_TEMPLATE_EXTENSION.to_string());
    if !is_safe_segment(&template_extension) {
        return Err(LoadError::invalid(
            "themes.template_extension",
            "must be a non-empty file extension",
        ));
    }

    let default_theme = themes
        .default_theme
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| DEFAULT_THEME.to_string());
    if !is_safe_segment(&default_theme) {
        return Err(LoadError::invalid(
            "themes.default_theme",
            "must be a plain directory name",
        ));
    }

    let runtime_version = themes
        .runtime_version
        .map(|version| version.trim().to_string())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    if runtime_version.is_empty() {
        return Err(LoadError::invalid(
            "themes.runtime_version",
            "must not be empty",
        ));
    }

    let required_templates =
        template_list(themes.required_templates, "themes.required_templates")?;
    let warmup_templates = template_list(themes.warmup_templates, "themes.warmup_templates")?;

    let io_timeout_ms = themes.io_timeout_ms.unwrap_or(DEFAULT_IO_TIMEOUT_MS);
    if io_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "themes.io_timeout_ms",
            "must be greater than zero",
        ));
    }

    let asset_base_url = themes
        .asset_base_url
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .unwrap_or_default();

    Ok(ThemeSettings {
        root,
        template_extension,
        default_theme,
        runtime_version,
        required_templates,
        warmup_templates,
        io_timeout: Duration::from_millis(io_timeout_ms),
        asset_base_url,
    })
}

fn template_list(value: Option<Vec<String>>, key: &'static str) -> Result<Vec<String>, LoadError> {
    let Some(names) = value else {
        return Ok(DEFAULT_TEMPLATE_SET.iter().map(|name| name.to_string()).collect());
    };
    let names: Vec<String> = names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    if let Some(bad) = names.iter().find(|name| !is_safe_segment(name)) {
        return Err(LoadError::invalid(
            key,
            format!("`{bad}` is not a plain template name"),
        ));
    }
    Ok(names)
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let mode = match cache.mode {
        Some(mode) => {
            CacheMode::from_str(&mode).map_err(|reason| LoadError::invalid("cache.mode", reason))?
        }
        None => CacheMode::Production,
    };

    let ttl = Duration::from_secs(cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS));
    let max_templates = NonZeroUsize::new(
        cache
            .max_templates
            .unwrap_or(DEFAULT_CACHE_MAX_TEMPLATES),
    )
    .unwrap_or(NonZeroUsize::MIN);

    Ok(CacheSettings {
        mode,
        ttl,
        max_templates,
        warmup_on_activate: cache.warmup_on_activate.unwrap_or(true),
    })
}

fn build_settings_store_settings(
    store: RawSettingsStoreSettings,
) -> Result<SettingsStoreSettings, LoadError> {
    let path = store
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "settings_store.path",
            "path must not be empty",
        ));
    }
    Ok(SettingsStoreSettings { path })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawThemeSettings {
    root: Option<PathBuf>,
    template_extension: Option<String>,
    default_theme: Option<String>,
    runtime_version: Option<String>,
    required_templates: Option<Vec<String>>,
    warmup_templates: Option<Vec<String>>,
    io_timeout_ms: Option<u64>,
    asset_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    mode: Option<String>,
    ttl_seconds: Option<u64>,
    max_templates: Option<usize>,
    warmup_on_activate: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettingsStoreSettings {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.themes.root, PathBuf::from("themes"));
        assert_eq!(settings.themes.template_extension, "tmpl");
        assert_eq!(settings.themes.default_theme, "default");
        assert_eq!(settings.themes.runtime_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            settings.themes.required_templates,
            vec!["home", "blog", "post", "page"]
        );
        assert_eq!(settings.themes.io_timeout, Duration::from_secs(2));
        assert_eq!(settings.cache.mode, CacheMode::Production);
        assert_eq!(settings.cache.ttl, Duration::from_secs(3600));
        assert_eq!(settings.cache.max_templates.get(), 100);
        assert!(settings.cache.warmup_on_activate);
        assert_eq!(settings.logging.level, LevelFilter::INFO);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.cache.mode = Some("production".to_string());
        raw.logging.level = Some("info".to_string());

        let overrides = Overrides {
            cache_mode: Some("development".to_string()),
            log_level: Some("debug".to_string()),
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.cache.mode, CacheMode::Development);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn zero_io_timeout_is_rejected() {
        let mut raw = RawSettings::default();
        raw.themes.io_timeout_ms = Some(0);
        let err = Settings::from_raw(raw).expect_err("invalid timeout");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "themes.io_timeout_ms",
                ..
            }
        ));
    }

    #[test]
    fn zero_max_templates_is_clamped() {
        let mut raw = RawSettings::default();
        raw.cache.max_templates = Some(0);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.cache.max_templates.get(), 1);
    }

    #[test]
    fn unknown_cache_mode_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.mode = Some("staging".to_string());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn template_lists_reject_paths() {
        let mut raw = RawSettings::default();
        raw.themes.required_templates = Some(vec!["home".into(), "../secret".into()]);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn asset_base_url_loses_trailing_slash() {
        let mut raw = RawSettings::default();
        raw.themes.asset_base_url = Some("https://cdn.example/".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.themes.asset_base_url, "https://cdn.example");
    }

    #[test]
    fn parse_resolve_arguments() {
        let args = CliArgs::parse_from([
            "vellum",
            "resolve",
            "post",
            "--slug",
            "hello",
            "--id",
            "7",
            "--themes-root",
            "/srv/themes",
        ]);

        assert_eq!(
            args.overrides.themes_root.as_deref(),
            Some(std::path::Path::new("/srv/themes"))
        );
        match args.command {
            Command::Resolve(resolve) => {
                assert_eq!(resolve.kind, "post");
                assert_eq!(resolve.slug.as_deref(), Some("hello"));
                assert_eq!(resolve.id, Some(7));
                assert!(resolve.theme.is_none());
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_import_arguments() {
        let args = CliArgs::parse_from([
            "vellum",
            "import",
            "/tmp/export.json",
            "--overwrite",
            "--skip",
            "accent",
            "--skip",
            "logo",
        ]);

        match args.command {
            Command::Import(import) => {
                assert_eq!(import.file, std::path::Path::new("/tmp/export.json"));
                assert!(import.overwrite);
                assert!(!import.no_validate);
                assert_eq!(import.skip, vec!["accent", "logo"]);
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_validate_arguments() {
        let args = CliArgs::parse_from(["vellum", "validate", "seasonal", "--json"]);
        match args.command {
            Command::Validate(validate) => {
                assert_eq!(validate.theme, "seasonal");
                assert!(validate.json);
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
