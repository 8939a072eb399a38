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

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tessera_fetch_hit_total",
            Unit::Count,
            "Total number of reads served from a fresh cache entry."
        );
        describe_counter!(
            "tessera_fetch_miss_total",
            Unit::Count,
            "Total number of reads that needed a fetch."
        );
        describe_counter!(
            "tessera_fetch_attach_total",
            Unit::Count,
            "Total number of reads that attached to an in-flight fetch."
        );
        describe_counter!(
            "tessera_fetch_retry_total",
            Unit::Count,
            "Total number of transient-failure fetch retries."
        );
        describe_counter!(
            "tessera_fetch_fenced_total",
            Unit::Count,
            "Total number of superseded fetch results discarded by fencing."
        );
        describe_counter!(
            "tessera_cache_entry_evict_total",
            Unit::Count,
            "Total number of cache entries evicted due to capacity."
        );
        describe_counter!(
            "tessera_mutation_commit_total",
            Unit::Count,
            "Total number of mutations committed with a server response."
        );
        describe_counter!(
            "tessera_mutation_rollback_total",
            Unit::Count,
            "Total number of mutations rolled back to their snapshot."
        );
        describe_counter!(
            "tessera_invalidation_fanout_total",
            Unit::Count,
            "Total number of cache entries marked stale by invalidation."
        );
        describe_counter!(
            "tessera_poll_tick_total",
            Unit::Count,
            "Total number of poll probes issued."
        );
        describe_counter!(
            "tessera_poll_error_total",
            Unit::Count,
            "Total number of transient poll probe failures."
        );
        describe_histogram!(
            "tessera_fetch_ms",
            Unit::Milliseconds,
            "Fetch latency in milliseconds, including retries."
        );
    });
}
