//! Cache storage for compiled templates and merged theme manifests.
//!
//! Templates: bounded LRU keyed by absolute file path, ordered by insertion.
//! Configs: unbounded concurrent map keyed by theme name.

use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;
use time::OffsetDateTime;

use crate::domain::manifest::ThemeManifest;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

fn next_entry_id() -> u64 {
    NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Opaque executable produced by an artifact loader.
#[derive(Clone)]
pub struct TemplateHandle(Arc<dyn Any + Send + Sync>);

impl TemplateHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Pointer identity.
    pub fn same_as(&self, other: &TemplateHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TemplateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TemplateHandle")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CachedTemplate {
    pub path: PathBuf,
    pub handle: TemplateHandle,
    /// Digest of the source file at load time; `None` if it could not be read.
    pub content_hash: Option<String>,
    pub loaded_at: OffsetDateTime,
    pub size_bytes: u64,
    loaded: Instant,
    id: u64,
}

impl CachedTemplate {
    pub fn new(
        path: PathBuf,
        handle: TemplateHandle,
        content_hash: Option<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            path,
            handle,
            content_hash,
            loaded_at: OffsetDateTime::now_utc(),
            size_bytes,
            loaded: Instant::now(),
            id: next_entry_id(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.loaded.elapsed() >= ttl
    }
}

#[derive(Debug, Clone)]
pub struct CachedConfig {
    pub theme: String,
    pub manifest: Arc<ThemeManifest>,
    /// Manifest file the entry was parsed from and its digest at that time.
    pub source: Option<(PathBuf, String)>,
    /// Length of the manifest serialized as JSON.
    pub size_bytes: u64,
    pub cached_at: OffsetDateTime,
    loaded: Instant,
    id: u64,
}

impl CachedConfig {
    pub fn new(theme: String, manifest: Arc<ThemeManifest>, source: Option<(PathBuf, String)>) -> Self {
        let size_bytes = serde_json::to_vec(manifest.as_ref()).map_or(0, |body| body.len() as u64);
        Self {
            theme,
            manifest,
            source,
            size_bytes,
            cached_at: OffsetDateTime::now_utc(),
            loaded: Instant::now(),
            id: next_entry_id(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.loaded.elapsed() >= ttl
    }
}

pub struct TemplateStore {
    entries: RwLock<LruCache<PathBuf, CachedTemplate>>,
}

impl TemplateStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Read without touching recency, so eviction follows load order.
    pub fn peek(&self, path: &Path) -> Option<CachedTemplate> {
        rw_read(&self.entries, SOURCE, "template_peek")
            .peek(path)
            .cloned()
    }

    /// Insert `entry`, returning the entry evicted to make room for it.
    ///
    /// Re-caching an existing path counts as a fresh load and moves it to
    /// the newest position.
    pub fn insert(&self, entry: CachedTemplate) -> Option<CachedTemplate> {
        let mut entries = rw_write(&self.entries, SOURCE, "template_insert");
        entries.pop(&entry.path);
        let evicted = if entries.len() >= entries.cap().get() {
            entries.pop_lru().map(|(_, evicted)| evicted)
        } else {
            None
        };
        entries.push(entry.path.clone(), entry);
        evicted
    }

    /// Remove `path` only if it still holds the entry identified by `id`.
    pub fn remove_if_same(&self, path: &Path, id: u64) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "template_remove_if_same");
        if entries.peek(path).is_some_and(|entry| entry.id == id) {
            entries.pop(path);
            true
        } else {
            false
        }
    }

    /// Remove every entry whose path lies under `prefix`. Returns the count removed.
    pub fn remove_under(&self, prefix: &Path) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "template_remove_under");
        let doomed: Vec<PathBuf> = entries
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &doomed {
            entries.pop(path);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "template_clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "template_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_size(&self) -> u64 {
        rw_read(&self.entries, SOURCE, "template_total_size")
            .iter()
            .map(|(_, entry)| entry.size_bytes)
            .sum()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        rw_read(&self.entries, SOURCE, "template_paths")
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }
}

#[derive(Default)]
pub struct ConfigStore {
    entries: DashMap<String, CachedConfig>,
}

impl ConfigStore {
    pub fn get(&self, theme: &str) -> Option<CachedConfig> {
        self.entries.get(theme).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, entry: CachedConfig) {
        self.entries.insert(entry.theme.clone(), entry);
    }

    pub fn remove(&self, theme: &str) -> bool {
        self.entries.remove(theme).is_some()
    }

    pub fn remove_if_same(&self, theme: &str, id: u64) -> bool {
        self.entries
            .remove_if(theme, |_, entry| entry.id == id)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|entry| entry.size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> CachedTemplate {
        CachedTemplate::new(
            PathBuf::from(path),
            TemplateHandle::new(path.to_string()),
            None,
            10,
        )
    }

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    #[test]
    fn evicts_oldest_insert_even_after_reads() {
        let store = TemplateStore::new(capacity(2));
        assert!(store.insert(entry("/t/a/templates/one.tmpl")).is_none());
        assert!(store.insert(entry("/t/a/templates/two.tmpl")).is_none());

        // Reads must not refresh recency.
        store.peek(Path::new("/t/a/templates/one.tmpl"));

        let evicted = store
            .insert(entry("/t/a/templates/three.tmpl"))
            .expect("eviction");
        assert_eq!(evicted.path, PathBuf::from("/t/a/templates/one.tmpl"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn replacing_a_path_does_not_evict() {
        let store = TemplateStore::new(capacity(2));
        store.insert(entry("/t/a/one.tmpl"));
        store.insert(entry("/t/a/two.tmpl"));
        assert!(store.insert(entry("/t/a/one.tmpl")).is_none());
        assert_eq!(store.len(), 2);

        let evicted = store.insert(entry("/t/a/three.tmpl")).expect("eviction");
        assert_eq!(evicted.path, PathBuf::from("/t/a/two.tmpl"));
    }

    #[test]
    fn remove_under_matches_whole_components() {
        let store = TemplateStore::new(capacity(10));
        store.insert(entry("/t/base/templates/index.tmpl"));
        store.insert(entry("/t/base2/templates/index.tmpl"));

        assert_eq!(store.remove_under(Path::new("/t/base")), 1);
        assert_eq!(store.paths(), vec![PathBuf::from("/t/base2/templates/index.tmpl")]);
    }

    #[test]
    fn remove_if_same_ignores_replaced_entries() {
        let store = TemplateStore::new(capacity(4));
        let first = entry("/t/a/one.tmpl");
        let stale_id = first.id();
        store.insert(first);
        store.insert(entry("/t/a/one.tmpl"));

        assert!(!store.remove_if_same(Path::new("/t/a/one.tmpl"), stale_id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn config_size_is_its_json_length() {
        let manifest = Arc::new(ThemeManifest::default());
        let expected = serde_json::to_vec(manifest.as_ref()).expect("json").len() as u64;
        let store = ConfigStore::default();
        store.insert(CachedConfig::new("a".to_string(), Arc::clone(&manifest), None));
        store.insert(CachedConfig::new("b".to_string(), manifest, None));

        assert!(expected > 0);
        assert_eq!(store.total_size(), expected * 2);
    }

    #[test]
    fn handle_downcasts_to_original_type() {
        let handle = TemplateHandle::new(42_u32);
        assert_eq!(handle.downcast::<u32>(), Some(&42));
        assert!(handle.downcast::<String>().is_none());
        assert!(handle.same_as(&handle.clone()));
        assert!(!handle.same_as(&TemplateHandle::new(42_u32)));
    }
}
