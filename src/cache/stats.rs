use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

pub(crate) const METRIC_TEMPLATE_HIT: &str = "vellum_theme_cache_template_hit_total";
pub(crate) const METRIC_TEMPLATE_MISS: &str = "vellum_theme_cache_template_miss_total";
pub(crate) const METRIC_TEMPLATE_EVICT: &str = "vellum_theme_cache_template_evict_total";
pub(crate) const METRIC_CONFIG_HIT: &str = "vellum_theme_cache_config_hit_total";
pub(crate) const METRIC_CONFIG_MISS: &str = "vellum_theme_cache_config_miss_total";

#[derive(Default)]
pub(crate) struct CacheCounters {
    template_hits: AtomicU64,
    template_misses: AtomicU64,
    template_evictions: AtomicU64,
    config_hits: AtomicU64,
    config_misses: AtomicU64,
}

impl CacheCounters {
    pub fn template_hit(&self) {
        self.template_hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_TEMPLATE_HIT).increment(1);
    }

    pub fn template_miss(&self) {
        self.template_misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_TEMPLATE_MISS).increment(1);
    }

    pub fn template_evicted(&self) {
        self.template_evictions.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_TEMPLATE_EVICT).increment(1);
    }

    pub fn config_hit(&self) {
        self.config_hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CONFIG_HIT).increment(1);
    }

    pub fn config_miss(&self) {
        self.config_misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CONFIG_MISS).increment(1);
    }

    pub fn reset(&self) {
        for counter in [
            &self.template_hits,
            &self.template_misses,
            &self.template_evictions,
            &self.config_hits,
            &self.config_misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn template_stats(&self, size: usize, max_size: usize) -> TemplateCacheStats {
        let hits = self.template_hits.load(Ordering::Relaxed);
        let misses = self.template_misses.load(Ordering::Relaxed);
        TemplateCacheStats {
            size,
            max_size,
            hits,
            misses,
            evictions: self.template_evictions.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
        }
    }

    pub fn config_stats(&self, size: usize) -> ConfigCacheStats {
        let hits = self.config_hits.load(Ordering::Relaxed);
        let misses = self.config_misses.load(Ordering::Relaxed);
        ConfigCacheStats {
            size,
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
        }
    }
}

/// Percentage of reads served from cache, rounded to two decimals.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    let rate = hits as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigCacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    /// Summed source size of cached templates.
    pub template_bytes: u64,
    /// Summed JSON size of cached manifests.
    pub config_bytes: u64,
    pub total_bytes: u64,
    pub hashed_files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub templates: TemplateCacheStats,
    pub configs: ConfigCacheStats,
    pub memory: MemoryStats,
}
