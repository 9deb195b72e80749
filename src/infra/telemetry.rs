use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber. Events go to stderr so command output on
/// stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .with_env_var("VELLUM_LOG")
        .from_env_lossy();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .without_time()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("tracing subscriber already set: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "vellum_theme_cache_template_hit_total",
            Unit::Count,
            "Total number of template cache hits."
        );
        describe_counter!(
            "vellum_theme_cache_template_miss_total",
            Unit::Count,
            "Total number of template cache misses, including stale and expired entries."
        );
        describe_counter!(
            "vellum_theme_cache_template_evict_total",
            Unit::Count,
            "Total number of template cache evictions due to capacity."
        );
        describe_counter!(
            "vellum_theme_cache_config_hit_total",
            Unit::Count,
            "Total number of theme config cache hits."
        );
        describe_counter!(
            "vellum_theme_cache_config_miss_total",
            Unit::Count,
            "Total number of theme config cache misses."
        );
        describe_counter!(
            "vellum_theme_activation_total",
            Unit::Count,
            "Theme activation attempts by outcome."
        );
        describe_histogram!(
            "vellum_theme_activation_ms",
            Unit::Milliseconds,
            "Theme activation latency in milliseconds, rollback included."
        );
    });
}
