//! Theme cache layer.
//!
//! Three caches share one [`ThemeCache`] instance:
//!
//! - **Templates**: compiled handles keyed by file path, bounded, evicted in
//!   load order
//! - **Configs**: parsed manifests keyed by theme name
//! - **File hashes**: content digests used to detect out-of-band edits
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! mode = "production"      # "development" disables caching
//! ttl_seconds = 3600
//! max_templates = 100
//! warmup_on_activate = true
//! ```

mod config;
mod hash;
mod lock;
mod service;
mod stats;
mod store;

pub use config::{CacheMode, ThemeCacheConfig};
pub use hash::{FileDigest, FileHashCache, sha256_hex};
pub use service::{ThemeCache, WarmupReport};
pub use stats::{CacheStats, ConfigCacheStats, MemoryStats, TemplateCacheStats, hit_rate};
pub use store::{CachedConfig, CachedTemplate, ConfigStore, TemplateHandle, TemplateStore};

pub(crate) use lock::{rw_read, rw_write};
