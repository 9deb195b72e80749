//! Settings stores backing the active-theme pointer and custom theme values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::application::repos::{SettingsError, SettingsStore};

/// Process-local store, used by tests and as a fallback for dry runs.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: DashMap<String, Value>,
}

impl MemorySettingsStore {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.values.get(key).map(|value| value.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.values.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SettingsError> {
        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Settings persisted as one JSON object on disk.
///
/// Every mutation rewrites the whole file through a temporary sibling and a
/// rename, so readers never observe a partially written document.
#[derive(Debug)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileSettingsStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(body) if body.trim().is_empty() => BTreeMap::new(),
            Ok(body) => serde_json::from_str(&body).map_err(|err| SettingsError::InvalidValue {
                key: path.display().to_string(),
                message: err.to_string(),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(SettingsError::unavailable(err)),
        };
        info!(
            target = "infra::settings",
            path = %path.display(),
            keys = values.len(),
            "settings store opened"
        );
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &BTreeMap<String, Value>) -> Result<(), SettingsError> {
        let body = serde_json::to_vec_pretty(values).map_err(SettingsError::unavailable)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SettingsError::unavailable)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, body)
            .await
            .map_err(SettingsError::unavailable)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(SettingsError::unavailable)?;
        debug!(target = "infra::settings", path = %self.path.display(), "settings persisted");
        Ok(())
    }

    async fn mutate(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, Value>),
    ) -> Result<(), SettingsError> {
        let mut guard = self.values.lock().await;
        let mut next = guard.clone();
        apply(&mut next);
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.mutate(|values| {
            values.insert(key.to_string(), value);
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.mutate(|values| {
            values.remove(key);
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SettingsError> {
        Ok(self
            .values
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn memory_store_prefix_listing_is_sorted() {
        let store = MemorySettingsStore::default();
        store.set("theme.base.b", json!(2)).await.expect("set");
        store.set("theme.base.a", json!(1)).await.expect("set");
        store.set("theme.other.a", json!(3)).await.expect("set");

        let keys = store.keys_with_prefix("theme.base.").await.expect("keys");
        assert_eq!(keys, vec!["theme.base.a", "theme.base.b"]);
        assert_eq!(
            store.get_or("missing", json!("fallback")).await.expect("get_or"),
            json!("fallback")
        );
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("state").join("settings.json");

        let store = JsonFileSettingsStore::open(&path).await.expect("open");
        store.set("active_theme", json!("seasonal")).await.expect("set");
        store.set("theme.seasonal.accent", json!("#f00")).await.expect("set");
        store.delete("theme.seasonal.accent").await.expect("delete");
        drop(store);

        let reopened = JsonFileSettingsStore::open(&path).await.expect("reopen");
        assert_eq!(
            reopened.get("active_theme").await.expect("get"),
            Some(json!("seasonal"))
        );
        assert_eq!(reopened.get("theme.seasonal.accent").await.expect("get"), None);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[1, 2").expect("write");
        assert!(JsonFileSettingsStore::open(&path).await.is_err());
    }
}
