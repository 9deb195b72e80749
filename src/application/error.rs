use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{
        hierarchy::TemplateLoadError, repos::SettingsError, transfer::TransferError,
    },
    config::LoadError,
    domain::error::ThemeError,
    infra::error::InfraError,
};

/// Flattened view of an error and its `source()` chain for operator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn from_message(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            messages: vec![message.into()],
        }
    }

    /// `first: second: third`
    pub fn render(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Theme(#[from] ThemeError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Template(#[from] TemplateLoadError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, AppError::Theme(err) if err.is_critical())
    }

    /// Process exit status for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            _ if self.is_critical() => 3,
            AppError::Theme(ThemeError::ValidationFailed { .. }) | AppError::Validation(_) => 2,
            AppError::Config(_) => 78,
            _ => 1,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
