//! Theme activation state machine.
//!
//! ```text
//! Idle -> Validating -> Activating -> Active
//!                           |
//!                           v
//!                      RollingBack -> Idle (previous theme restored)
//! ```
//!
//! One activation runs at a time; later callers wait on the gate.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::{ThemeCache, WarmupReport, rw_read, rw_write};
use crate::domain::error::ThemeError;

use super::active::ActiveTheme;
use super::inheritance::InheritanceResolver;
use super::repos::{
    ACTIVE_THEME_KEY, ArtifactLoader, HelperError, HelperLoader, SettingsError, SettingsStore,
    custom_setting_key,
};
use super::validator::ThemeValidator;

const SOURCE: &str = "application::activation";
const METRIC_ACTIVATION_MS: &str = "vellum_theme_activation_ms";
const METRIC_ACTIVATION_TOTAL: &str = "vellum_theme_activation_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    Idle,
    Validating,
    Activating,
    Active,
    RollingBack,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActivationState::Idle => "idle",
            ActivationState::Validating => "validating",
            ActivationState::Activating => "activating",
            ActivationState::Active => "active",
            ActivationState::RollingBack => "rolling_back",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub struct ActivationOutcome {
    pub theme: String,
    pub previous: String,
    pub warnings: Vec<String>,
    /// Custom setting keys seeded with their declared default.
    pub initialized: Vec<String>,
    /// Background warmup of the new theme, when enabled.
    pub warmup: Option<JoinHandle<WarmupReport>>,
}

#[derive(Debug, Error)]
enum StepError {
    #[error("settings: {0}")]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Theme(#[from] ThemeError),
    #[error(transparent)]
    Helpers(#[from] HelperError),
}

/// Background template warmup run after a successful activation.
#[derive(Clone)]
pub struct WarmupPlan {
    pub templates: Vec<String>,
    pub artifacts: Arc<dyn ArtifactLoader>,
}

pub struct ThemeActivator {
    gate: Mutex<()>,
    state: RwLock<ActivationState>,
    active: Arc<ActiveTheme>,
    settings: Arc<dyn SettingsStore>,
    helpers: Arc<dyn HelperLoader>,
    cache: Arc<ThemeCache>,
    validator: Arc<ThemeValidator>,
    inheritance: Arc<InheritanceResolver>,
    warmup: Option<WarmupPlan>,
}

impl ThemeActivator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        active: Arc<ActiveTheme>,
        settings: Arc<dyn SettingsStore>,
        helpers: Arc<dyn HelperLoader>,
        cache: Arc<ThemeCache>,
        validator: Arc<ThemeValidator>,
        inheritance: Arc<InheritanceResolver>,
        warmup: Option<WarmupPlan>,
    ) -> Self {
        Self {
            gate: Mutex::new(()),
            state: RwLock::new(ActivationState::Idle),
            active,
            settings,
            helpers,
            cache,
            validator,
            inheritance,
            warmup,
        }
    }

    pub fn state(&self) -> ActivationState {
        *rw_read(&self.state, SOURCE, "state")
    }

    fn transition(&self, next: ActivationState) {
        let mut state = rw_write(&self.state, SOURCE, "transition");
        info!(
            target = "application::activation",
            from = %*state,
            to = %next,
            "activation state changed"
        );
        *state = next;
    }

    /// Validate `theme`, make it active and rebind everything that depends
    /// on it. Any failure after validation restores the previous theme.
    pub async fn activate(&self, theme: &str) -> Result<ActivationOutcome, ThemeError> {
        let _guard = self.gate.lock().await;
        let started = Instant::now();
        let previous = self.active.get();

        let result = self.run(theme, &previous).await;

        let outcome = match &result {
            Ok(_) => "activated",
            Err(ThemeError::ValidationFailed { .. }) => "rejected",
            Err(ThemeError::RollbackFailed { .. }) => "rollback_failed",
            Err(_) => "rolled_back",
        };
        counter!(METRIC_ACTIVATION_TOTAL, "outcome" => outcome).increment(1);
        histogram!(METRIC_ACTIVATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn run(&self, theme: &str, previous: &str) -> Result<ActivationOutcome, ThemeError> {
        self.transition(ActivationState::Validating);
        let report = self.validator.validate(theme).await;
        for warning in &report.warnings {
            warn!(target = "application::activation", theme, warning = %warning, "theme warning");
        }
        if !report.valid {
            self.transition(ActivationState::Idle);
            return Err(report.into_error());
        }

        self.transition(ActivationState::Activating);
        match self.apply(theme).await {
            Ok(initialized) => {
                self.transition(ActivationState::Active);
                info!(
                    target = "application::activation",
                    theme,
                    previous,
                    initialized = initialized.len(),
                    "theme activated"
                );
                Ok(ActivationOutcome {
                    theme: theme.to_string(),
                    previous: previous.to_string(),
                    warnings: report.warnings,
                    initialized,
                    warmup: self.spawn_warmup(theme),
                })
            }
            Err(err) => {
                let cause = err.to_string();
                warn!(
                    target = "application::activation",
                    theme,
                    previous,
                    error = %cause,
                    "activation failed; rolling back"
                );
                self.transition(ActivationState::RollingBack);
                let rollback = self.rollback(theme, previous, &cause).await;
                self.transition(ActivationState::Idle);
                rollback?;
                Err(ThemeError::ActivationFailed {
                    theme: theme.to_string(),
                    cause,
                })
            }
        }
    }

    async fn apply(&self, theme: &str) -> Result<Vec<String>, StepError> {
        self.settings
            .set(ACTIVE_THEME_KEY, Value::String(theme.to_string()))
            .await?;
        self.active.set(theme);

        let initialized = self.initialize_defaults(theme).await?;
        self.helpers.load_helpers(theme).await?;
        self.cache.invalidate_all();
        Ok(initialized)
    }

    /// Seed declared custom settings that have no stored value yet.
    async fn initialize_defaults(&self, theme: &str) -> Result<Vec<String>, StepError> {
        let merged = self.inheritance.merged_config(theme).await?;
        let mut initialized = Vec::new();
        for (key, definition) in &merged.config.custom {
            let storage_key = custom_setting_key(theme, key);
            if self.settings.get(&storage_key).await?.is_none() {
                self.settings
                    .set(&storage_key, definition.default_value())
                    .await?;
                initialized.push(key.clone());
            }
        }
        Ok(initialized)
    }

    async fn rollback(&self, theme: &str, previous: &str, cause: &str) -> Result<(), ThemeError> {
        self.active.set(previous);

        if let Err(err) = self
            .settings
            .set(ACTIVE_THEME_KEY, Value::String(previous.to_string()))
            .await
        {
            error!(
                target = "application::activation",
                severity = "critical",
                theme,
                previous,
                cause,
                error = %err,
                "rollback could not restore the active theme pointer; operator intervention required"
            );
            self.cache.invalidate_all();
            return Err(ThemeError::RollbackFailed {
                theme: theme.to_string(),
                previous: previous.to_string(),
                cause: cause.to_string(),
                rollback: err.to_string(),
            });
        }

        if let Err(err) = self.helpers.load_helpers(previous).await {
            warn!(
                target = "application::activation",
                previous,
                error = %err,
                "could not rebind helpers of previous theme"
            );
        }
        self.cache.invalidate_all();
        info!(target = "application::activation", theme, previous, "rollback complete");
        Ok(())
    }

    fn spawn_warmup(&self, theme: &str) -> Option<JoinHandle<WarmupReport>> {
        let plan = self.warmup.clone()?;
        if !self.cache.config().warmup_on_activate || !self.cache.config().is_enabled() {
            return None;
        }
        Some(spawn_warmup(Arc::clone(&self.cache), plan, theme.to_string()))
    }
}

/// Warm `theme` on the runtime without blocking the caller.
pub fn spawn_warmup(
    cache: Arc<ThemeCache>,
    plan: WarmupPlan,
    theme: String,
) -> JoinHandle<WarmupReport> {
    tokio::spawn(async move {
        cache
            .warmup(&theme, &plan.templates, plan.artifacts.as_ref())
            .await
    })
}
