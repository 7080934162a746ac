use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_HTTP_HIT_TOTAL, METRIC_HTTP_MISS_TOTAL, METRIC_MEMORY_EVICT_TOTAL,
    METRIC_PROVIDER_FILL_TOTAL, METRIC_PROVIDER_HIT_TOTAL, METRIC_PROVIDER_MISS_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::paging::{
    METRIC_PAGING_LOCK_CONTENTION_TOTAL, METRIC_PAGING_PRODUCE_MS, METRIC_PAGING_REBUILD_TOTAL,
};

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

/// Register descriptions for every metric the crate emits with the installed
/// recorder. Safe to call more than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_PROVIDER_HIT_TOTAL,
            Unit::Count,
            "Compound provider reads answered by a layer, labelled by layer index."
        );
        describe_counter!(
            METRIC_PROVIDER_MISS_TOTAL,
            Unit::Count,
            "Compound provider reads that missed every layer."
        );
        describe_counter!(
            METRIC_PROVIDER_FILL_TOTAL,
            Unit::Count,
            "Upper-layer backfills after a deeper hit, labelled by layer name."
        );
        describe_counter!(
            METRIC_MEMORY_EVICT_TOTAL,
            Unit::Count,
            "In-process cache entries evicted to stay within the byte budget."
        );
        describe_counter!(
            METRIC_PAGING_REBUILD_TOTAL,
            Unit::Count,
            "Paging snapshot rebuilds (producer invocations)."
        );
        describe_counter!(
            METRIC_PAGING_LOCK_CONTENTION_TOTAL,
            Unit::Count,
            "Paging rebuilds that lost the rebuild lock and skipped the snapshot write."
        );
        describe_histogram!(
            METRIC_PAGING_PRODUCE_MS,
            Unit::Milliseconds,
            "Paging producer latency in milliseconds."
        );
        describe_counter!(
            METRIC_HTTP_HIT_TOTAL,
            Unit::Count,
            "HTTP responses served from the response cache."
        );
        describe_counter!(
            METRIC_HTTP_MISS_TOTAL,
            Unit::Count,
            "HTTP requests that reached the handler through the response cache."
        );
    });
}
