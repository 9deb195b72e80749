use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("manifest for theme `{theme}` not found at {}", path.display())]
    ManifestNotFound { theme: String, path: PathBuf },
    #[error("manifest for theme `{theme}` is invalid: {reason}")]
    InvalidManifest { theme: String, reason: String },
    #[error("theme `{theme}` could not be resolved: {reason}")]
    ThemeNotFound { theme: String, reason: String },
    #[error("circular inheritance detected at `{offending}` (chain: {})", chain.join(" -> "))]
    CircularInheritance {
        offending: String,
        chain: Vec<String>,
    },
    #[error("theme validation failed: {}", errors.join("; "))]
    ValidationFailed {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
    #[error("activation of theme `{theme}` failed: {cause}")]
    ActivationFailed { theme: String, cause: String },
    #[error(
        "rollback to theme `{previous}` after failed activation of `{theme}` failed: {rollback} (original failure: {cause})"
    )]
    RollbackFailed {
        theme: String,
        previous: String,
        cause: String,
        rollback: String,
    },
}

impl ThemeError {
    pub fn manifest_not_found(theme: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::ManifestNotFound {
            theme: theme.into(),
            path: path.into(),
        }
    }

    pub fn invalid_manifest(theme: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            theme: theme.into(),
            reason: reason.into(),
        }
    }

    pub fn theme_not_found(theme: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ThemeNotFound {
            theme: theme.into(),
            reason: reason.into(),
        }
    }

    /// True for the one condition that leaves the active-theme pointer and the
    /// bound theme out of sync and needs an operator.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_inheritance_message_lists_chain() {
        let err = ThemeError::CircularInheritance {
            offending: "a".to_string(),
            chain: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "circular inheritance detected at `a` (chain: a -> b)"
        );
    }

    #[test]
    fn only_rollback_failure_is_critical() {
        let rollback = ThemeError::RollbackFailed {
            theme: "b".into(),
            previous: "a".into(),
            cause: "helpers".into(),
            rollback: "store offline".into(),
        };
        assert!(rollback.is_critical());
        assert!(!ThemeError::theme_not_found("x", "missing").is_critical());
    }
}
