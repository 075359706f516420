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
///
/// Log lines go to stderr so rendered pages and event streams can own stdout.
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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
            "reqview_render_items_rendered_total",
            Unit::Count,
            "Total number of item blocks rendered."
        );
        describe_counter!(
            "reqview_render_items_skipped_total",
            Unit::Count,
            "Total number of unchanged items skipped by partial passes."
        );
        describe_counter!(
            "reqview_render_full_restart_total",
            Unit::Count,
            "Total number of partial passes restarted as full renders after reference definitions changed."
        );
        describe_counter!(
            "reqview_render_item_failures_total",
            Unit::Count,
            "Total number of items replaced by an error placeholder."
        );
        describe_histogram!(
            "reqview_render_batch_ms",
            Unit::Milliseconds,
            "Render pass latency in milliseconds."
        );
        describe_counter!(
            "reqview_watch_events_total",
            Unit::Count,
            "Total number of debounced document change events."
        );
    });
}
