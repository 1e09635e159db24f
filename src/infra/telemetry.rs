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
            "quaderno_compile_total",
            Unit::Count,
            "Total number of compile requests accepted."
        );
        describe_counter!(
            "quaderno_compile_failure_total",
            Unit::Count,
            "Total number of compile requests that ended in a failure outcome."
        );
        describe_counter!(
            "quaderno_compile_superseded_total",
            Unit::Count,
            "Total number of queued compile requests replaced by a newer one."
        );
        describe_histogram!(
            "quaderno_compile_ms",
            Unit::Milliseconds,
            "Renderer subprocess latency in milliseconds."
        );
        describe_counter!(
            "quaderno_pages_drawn_total",
            Unit::Count,
            "Total number of artifact pages drawn to the front end."
        );
        describe_counter!(
            "quaderno_presenter_cancelled_total",
            Unit::Count,
            "Total number of presentation sessions cancelled by a newer one."
        );
    });
}
