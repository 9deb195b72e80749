use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;
use vellum::application::activation::ActivationState;
use vellum::application::engine::{EngineOptions, ThemeEngine};
use vellum::application::repos::{
    ACTIVE_THEME_KEY, HelperError, HelperLoader, SettingsError, SettingsStore,
};
use vellum::domain::error::ThemeError;
use vellum::domain::kind::{ContentKind, TemplateParams};
use vellum::infra::settings::MemorySettingsStore;

const TEMPLATES: &[&str] = &["index", "home", "blog", "post", "page"];

fn write_theme(root: &Path, name: &str, templates: &[&str]) {
    let dir = root.join(name);
    for sub in ["templates", "partials", "assets"] {
        std::fs::create_dir_all(dir.join(sub)).expect("theme directories should be created");
    }
    let manifest = json!({
        "name": name,
        "displayName": name,
        "version": "1.0.0",
        "description": "fixture",
        "author": { "name": "Fixture" },
        "config": {
            "postsPerPage": 5,
            "custom": {
                "accent": { "type": "color", "label": "Accent", "default": "#000" },
                "tagline": { "type": "text", "label": "Tagline" }
            }
        }
    });
    std::fs::write(dir.join("theme.json"), manifest.to_string()).expect("manifest should write");
    for template in templates {
        std::fs::write(
            dir.join("templates").join(format!("{template}.tmpl")),
            format!("{name}/{template}"),
        )
        .expect("template should write");
    }
}

/// Records every helper binding and fails for one theme.
#[derive(Default)]
struct RecordingHelpers {
    fail_for: Option<String>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingHelpers {
    fn failing_for(theme: &str) -> Self {
        Self {
            fail_for: Some(theme.to_string()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl HelperLoader for RecordingHelpers {
    async fn load_helpers(&self, theme: &str) -> Result<(), HelperError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().expect("calls lock").push(theme.to_string());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_for.as_deref() == Some(theme) {
            return Err(HelperError::new(theme, "helper module failed to compile"));
        }
        Ok(())
    }
}

/// Memory store that refuses to write one value of the active theme key.
struct RefusingStore {
    inner: MemorySettingsStore,
    refuse_active: String,
}

#[async_trait]
impl SettingsStore for RefusingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        if key == ACTIVE_THEME_KEY && value == json!(self.refuse_active) {
            return Err(SettingsError::unavailable("store went read-only"));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.inner.delete(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SettingsError> {
        self.inner.keys_with_prefix(prefix).await
    }
}

fn seeded_store(active: &str) -> MemorySettingsStore {
    MemorySettingsStore::from_pairs([(ACTIVE_THEME_KEY.to_string(), json!(active))])
}

async fn engine(
    root: &Path,
    store: Arc<dyn SettingsStore>,
    helpers: Arc<dyn HelperLoader>,
) -> ThemeEngine {
    ThemeEngine::build_with(EngineOptions::new(root), store, Some(helpers), None).await
}

#[tokio::test]
async fn helper_failure_rolls_back_to_previous_theme() {
    let dir = TempDir::new().expect("tempdir");
    write_theme(dir.path(), "a", TEMPLATES);
    write_theme(dir.path(), "b", TEMPLATES);
    let store = Arc::new(seeded_store("a"));
    let helpers = Arc::new(RecordingHelpers::failing_for("b"));
    let engine = engine(dir.path(), store.clone(), helpers.clone()).await;

    engine
        .resolver()
        .load_template(ContentKind::Home, &TemplateParams::default())
        .await
        .expect("loads")
        .expect("found");
    assert_eq!(engine.stats().templates.size, 1);

    let err = engine.activate("b").await.expect_err("activation fails");
    assert!(matches!(err, ThemeError::ActivationFailed { ref theme, .. } if theme == "b"));

    assert_eq!(engine.active_theme(), "a");
    assert_eq!(
        store.get(ACTIVE_THEME_KEY).await.expect("get"),
        Some(json!("a"))
    );
    assert_eq!(helpers.calls(), vec!["b", "a"]);
    assert_eq!(engine.stats().templates.size, 0);
    assert_eq!(engine.stats().configs.size, 0);
    assert_eq!(engine.activator().state(), ActivationState::Idle);
}

#[tokio::test]
async fn invalid_theme_is_rejected_without_side_effects() {
    let dir = TempDir::new().expect("tempdir");
    write_theme(dir.path(), "a", TEMPLATES);
    write_theme(dir.path(), "thin", &["index"]);
    let store = Arc::new(seeded_store("a"));
    let helpers = Arc::new(RecordingHelpers::default());
    let engine = engine(dir.path(), store.clone(), helpers.clone()).await;

    let err = engine.activate("thin").await.expect_err("rejected");
    let ThemeError::ValidationFailed { errors, .. } = err else {
        panic!("expected validation failure, got {err:?}");
    };
    assert!(errors.iter().any(|e| e.contains("`home`")));
    assert!(errors.iter().any(|e| e.contains("`page`")));

    assert_eq!(engine.active_theme(), "a");
    assert!(helpers.calls().is_empty());
    assert_eq!(store.snapshot().len(), 1);
    assert_eq!(engine.activator().state(), ActivationState::Idle);
}

#[tokio::test]
async fn successful_activation_seeds_defaults_once() {
    let dir = TempDir::new().expect("tempdir");
    write_theme(dir.path(), "a", TEMPLATES);
    write_theme(dir.path(), "b", TEMPLATES);
    let store = Arc::new(seeded_store("a"));
    let helpers = Arc::new(RecordingHelpers::default());
    let engine = engine(dir.path(), store.clone(), helpers.clone()).await;

    let outcome = engine.activate("b").await.expect("activates");
    assert_eq!(outcome.previous, "a");
    assert_eq!(outcome.initialized, vec!["accent", "tagline"]);
    assert_eq!(engine.active_theme(), "b");
    assert_eq!(engine.activator().state(), ActivationState::Active);
    assert_eq!(
        store.get("theme.b.tagline").await.expect("get"),
        Some(Value::Null)
    );

    let report = outcome
        .warmup
        .expect("warmup spawned")
        .await
        .expect("warmup task");
    assert_eq!(report.theme, "b");
    assert_eq!(report.loaded, vec!["home", "blog", "post", "page"]);

    store
        .set("theme.b.accent", json!("#f00"))
        .await
        .expect("operator edit");
    engine.activate("a").await.expect("back to a");
    let again = engine.activate("b").await.expect("b again");

    assert!(again.initialized.is_empty());
    assert_eq!(
        store.get("theme.b.accent").await.expect("get"),
        Some(json!("#f00"))
    );
    assert_eq!(helpers.calls(), vec!["b", "a", "b"]);
}

#[tokio::test]
async fn failed_rollback_is_critical() {
    let dir = TempDir::new().expect("tempdir");
    write_theme(dir.path(), "a", TEMPLATES);
    write_theme(dir.path(), "b", TEMPLATES);
    let store = Arc::new(RefusingStore {
        inner: seeded_store("a"),
        refuse_active: "a".to_string(),
    });
    let helpers = Arc::new(RecordingHelpers::failing_for("b"));
    let engine = engine(dir.path(), store.clone(), helpers.clone()).await;

    let err = engine.activate("b").await.expect_err("rollback fails");
    assert!(err.is_critical());
    let ThemeError::RollbackFailed {
        theme, previous, ..
    } = err
    else {
        panic!("expected rollback failure");
    };
    assert_eq!((theme.as_str(), previous.as_str()), ("b", "a"));
    assert_eq!(
        store.get(ACTIVE_THEME_KEY).await.expect("get"),
        Some(json!("b"))
    );
    assert_eq!(engine.activator().state(), ActivationState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_activations_are_serialized() {
    let dir = TempDir::new().expect("tempdir");
    write_theme(dir.path(), "a", TEMPLATES);
    write_theme(dir.path(), "b", TEMPLATES);
    write_theme(dir.path(), "c", TEMPLATES);
    let store = Arc::new(seeded_store("a"));
    let helpers = Arc::new(RecordingHelpers {
        delay: Some(Duration::from_millis(30)),
        ..Default::default()
    });
    let engine = Arc::new(engine(dir.path(), store.clone(), helpers.clone()).await);

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.activate("b").await.map(|o| o.theme) })
    };
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.activate("c").await.map(|o| o.theme) })
    };
    first.await.expect("join").expect("b activates");
    second.await.expect("join").expect("c activates");

    assert_eq!(helpers.max_in_flight.load(Ordering::SeqCst), 1);
    let calls = helpers.calls();
    assert_eq!(calls.len(), 2);
    let last = calls.last().cloned().expect("last call");
    assert_eq!(engine.active_theme(), last);
    assert_eq!(
        store.get(ACTIVE_THEME_KEY).await.expect("get"),
        Some(json!(last))
    );
}
