//! Observability: tracing subscriber and Prometheus metrics.

use crate::config::{LogFormat, LoggingConfig};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Request duration buckets, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()?,
    }

    Ok(())
}

/// Install the Prometheus recorder and describe the metrics this crate emits.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)?
        .install_recorder()?;

    register_metric_descriptions();
    tracing::info!("Metrics initialized");
    Ok(handle)
}

/// Register all metric descriptions.
pub fn register_metric_descriptions() {
    describe_counter!(
        "folio_http_requests_total",
        "Total number of HTTP requests by method and status"
    );
    describe_histogram!(
        "folio_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "folio_rate_limit_rejections_total",
        "Requests rejected by the rate limiter"
    );
    describe_counter!(
        "folio_auth_failures_total",
        "Requests rejected by the authentication guard"
    );
    describe_counter!(
        "folio_errors_total",
        "Error responses by status and kind"
    );
}
