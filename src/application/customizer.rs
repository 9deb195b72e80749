//! Customization sessions over a theme's custom settings.
//!
//! A session holds pending changes in memory with an undo/redo history. The
//! live settings only move on [`ThemeCustomizer::publish`]; until then the
//! session's view is the stored values with its applied changes laid over
//! them. Drafts are parked in the settings store under [`DRAFT_KEY_PREFIX`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::repos::{SettingsError, SettingsStore};
use super::transfer::{ConfigTransfer, TransferError};

/// Changes kept per session; the oldest fall off first.
pub const MAX_HISTORY: usize = 50;
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DRAFT_KEY_PREFIX: &str = "customizer.draft.";

pub fn draft_key(theme: &str, user: &str) -> String {
    format!("{DRAFT_KEY_PREFIX}{theme}.{user}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum CustomizerError {
    #[error("customizer {0} not found")]
    SessionNotFound(SessionId),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("theme `{theme}` declares no custom setting `{key}`")]
    UnknownSetting { theme: String, key: String },
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizerChange {
    pub key: String,
    pub old_value: Value,
    pub new_value: Value,
    pub description: String,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizerSession {
    pub id: SessionId,
    pub user: String,
    pub theme: String,
    pub changes: Vec<CustomizerChange>,
    /// Number of leading `changes` currently applied; the rest are redoable.
    pub applied: usize,
    /// Set when the session holds changes newer than its last saved draft.
    pub is_draft: bool,
    pub last_saved: String,
    pub created_at: String,
}

impl CustomizerSession {
    fn overlay(&self, mut values: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        for change in &self.changes[..self.applied] {
            values.insert(change.key.clone(), change.new_value.clone());
        }
        values
    }

    fn state(&self, base: BTreeMap<String, Value>) -> CustomizerState {
        CustomizerState {
            settings: self.overlay(base),
            pending_changes: self.applied,
            can_undo: self.applied > 0,
            can_redo: self.applied < self.changes.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizerState {
    pub settings: BTreeMap<String, Value>,
    pub pending_changes: usize,
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Stored form of a saved session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizerDraft {
    pub changes: Vec<CustomizerChange>,
    pub applied: usize,
    pub saved_at: String,
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339).unwrap_or_else(|_| now.to_string())
}

pub struct ThemeCustomizer {
    transfer: Arc<ConfigTransfer>,
    settings: Arc<dyn SettingsStore>,
    sessions: DashMap<SessionId, CustomizerSession>,
    next_id: AtomicU64,
}

impl ThemeCustomizer {
    pub fn new(transfer: Arc<ConfigTransfer>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            transfer,
            settings,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a session for `user` on `theme`. Fails when the theme does not load.
    pub async fn start_session(
        &self,
        user: &str,
        theme: &str,
    ) -> Result<CustomizerSession, CustomizerError> {
        self.transfer.custom_settings(theme).await?;

        let now = now_rfc3339();
        let session = CustomizerSession {
            id: SessionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            user: user.to_string(),
            theme: theme.to_string(),
            changes: Vec::new(),
            applied: 0,
            is_draft: false,
            last_saved: now.clone(),
            created_at: now,
        };
        self.sessions.insert(session.id, session.clone());
        debug!(target = "application::customizer", session = %session.id, theme, user, "customizer session started");
        Ok(session)
    }

    pub fn session(&self, id: SessionId) -> Option<CustomizerSession> {
        self.sessions.get(&id).map(|session| session.clone())
    }

    /// Drop a session without touching stored settings or drafts.
    pub fn end_session(&self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub async fn state(&self, id: SessionId) -> Result<CustomizerState, CustomizerError> {
        let session = self.session(id).ok_or(CustomizerError::SessionNotFound(id))?;
        let base = self.transfer.custom_settings(&session.theme).await?;
        Ok(session.state(base))
    }

    /// Applied changes, oldest first.
    pub fn history(&self, id: SessionId) -> Result<Vec<CustomizerChange>, CustomizerError> {
        let session = self.session(id).ok_or(CustomizerError::SessionNotFound(id))?;
        Ok(session.changes[..session.applied].to_vec())
    }

    pub async fn apply_change(
        &self,
        id: SessionId,
        key: &str,
        value: Value,
        description: Option<&str>,
    ) -> Result<CustomizerState, CustomizerError> {
        let theme = self.theme_of(id)?;
        let base = self.transfer.custom_settings(&theme).await?;
        if !base.contains_key(key) {
            return Err(CustomizerError::UnknownSetting {
                theme,
                key: key.to_string(),
            });
        }

        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(CustomizerError::SessionNotFound(id))?;
        let old_value = session
            .overlay(base.clone())
            .remove(key)
            .unwrap_or(Value::Null);
        let applied = session.applied;
        session.changes.truncate(applied);
        session.changes.push(CustomizerChange {
            key: key.to_string(),
            old_value,
            new_value: value,
            description: description
                .map(str::to_string)
                .unwrap_or_else(|| format!("Changed {key}")),
            recorded_at: now_rfc3339(),
        });
        session.applied += 1;

        if session.changes.len() > MAX_HISTORY {
            let dropped = session.changes.len() - MAX_HISTORY;
            session.changes.drain(..dropped);
            session.applied -= dropped;
        }
        session.is_draft = true;
        Ok(session.state(base))
    }

    pub async fn undo(&self, id: SessionId) -> Result<CustomizerState, CustomizerError> {
        self.step(id, |session| {
            if session.applied == 0 {
                return Err(CustomizerError::NothingToUndo);
            }
            session.applied -= 1;
            Ok(())
        })
        .await
    }

    pub async fn redo(&self, id: SessionId) -> Result<CustomizerState, CustomizerError> {
        self.step(id, |session| {
            if session.applied == session.changes.len() {
                return Err(CustomizerError::NothingToRedo);
            }
            session.applied += 1;
            Ok(())
        })
        .await
    }

    /// Discard every change in the session.
    pub async fn reset(&self, id: SessionId) -> Result<CustomizerState, CustomizerError> {
        self.step(id, |session| {
            session.changes.clear();
            session.applied = 0;
            session.is_draft = false;
            Ok(())
        })
        .await
    }

    pub async fn save_draft(&self, id: SessionId) -> Result<(), CustomizerError> {
        let session = self.session(id).ok_or(CustomizerError::SessionNotFound(id))?;
        let key = draft_key(&session.theme, &session.user);
        let saved_at = now_rfc3339();
        let draft = CustomizerDraft {
            changes: session.changes,
            applied: session.applied,
            saved_at: saved_at.clone(),
        };
        let value = serde_json::to_value(&draft).map_err(|err| SettingsError::InvalidValue {
            key: key.clone(),
            message: err.to_string(),
        })?;
        self.settings.set(&key, value).await?;

        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.is_draft = false;
            session.last_saved = saved_at;
        }
        debug!(target = "application::customizer", session = %id, key = %key, "customizer draft saved");
        Ok(())
    }

    /// Saved draft of `user` for `theme`. An unreadable draft counts as none.
    pub async fn load_draft(
        &self,
        user: &str,
        theme: &str,
    ) -> Result<Option<CustomizerDraft>, CustomizerError> {
        let key = draft_key(theme, user);
        let Some(value) = self.settings.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<CustomizerDraft>(value) {
            Ok(draft) if draft.applied <= draft.changes.len() => Ok(Some(draft)),
            Ok(_) => {
                warn!(target = "application::customizer", key = %key, "customizer draft is inconsistent");
                Ok(None)
            }
            Err(err) => {
                warn!(target = "application::customizer", key = %key, error = %err, "customizer draft is unreadable");
                Ok(None)
            }
        }
    }

    /// Replace the session's history with its owner's saved draft, if any.
    pub async fn restore_draft(&self, id: SessionId) -> Result<bool, CustomizerError> {
        let session = self.session(id).ok_or(CustomizerError::SessionNotFound(id))?;
        let Some(draft) = self.load_draft(&session.user, &session.theme).await? else {
            return Ok(false);
        };
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(CustomizerError::SessionNotFound(id))?;
        session.changes = draft.changes;
        session.applied = draft.applied;
        session.is_draft = false;
        session.last_saved = draft.saved_at;
        Ok(true)
    }

    /// Write the applied changes to the live settings and drop the draft.
    ///
    /// Returns the keys written. The session stays open with its history.
    pub async fn publish(&self, id: SessionId) -> Result<Vec<String>, CustomizerError> {
        let session = self.session(id).ok_or(CustomizerError::SessionNotFound(id))?;
        let values = session.overlay(BTreeMap::new());
        self.transfer
            .update_custom_settings(&session.theme, &values)
            .await?;
        self.settings
            .delete(&draft_key(&session.theme, &session.user))
            .await?;

        if let Some(mut live) = self.sessions.get_mut(&id) {
            live.is_draft = false;
            live.last_saved = now_rfc3339();
        }
        info!(
            target = "application::customizer",
            session = %id,
            theme = %session.theme,
            published = values.len(),
            "customizer changes published"
        );
        Ok(values.into_keys().collect())
    }

    /// Save the draft every `interval` (usually [`AUTOSAVE_INTERVAL`]) while
    /// the session has unsaved changes. The task ends with the session.
    pub fn spawn_autosave(self: &Arc<Self>, id: SessionId, interval: Duration) -> JoinHandle<()> {
        let customizer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = customizer.session(id) else {
                    break;
                };
                if !session.is_draft {
                    continue;
                }
                if let Err(err) = customizer.save_draft(id).await {
                    warn!(target = "application::customizer", session = %id, error = %err, "customizer autosave failed");
                }
            }
            debug!(target = "application::customizer", session = %id, "customizer autosave stopped");
        })
    }

    fn theme_of(&self, id: SessionId) -> Result<String, CustomizerError> {
        self.sessions
            .get(&id)
            .map(|session| session.theme.clone())
            .ok_or(CustomizerError::SessionNotFound(id))
    }

    async fn step(
        &self,
        id: SessionId,
        apply: impl FnOnce(&mut CustomizerSession) -> Result<(), CustomizerError>,
    ) -> Result<CustomizerState, CustomizerError> {
        let theme = self.theme_of(id)?;
        let base = self.transfer.custom_settings(&theme).await?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(CustomizerError::SessionNotFound(id))?;
        apply(session.value_mut())?;
        Ok(session.state(base))
    }
}
