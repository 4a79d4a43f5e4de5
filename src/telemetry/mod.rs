//! Telemetry initialization: metrics and structured logging

use crate::config::TelemetryConfig;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the telemetry stack.
///
/// Returns `Some(PrometheusHandle)` when metrics are enabled so the HTTP
/// server can expose a `/metrics` endpoint.
pub fn init(config: &TelemetryConfig) -> Option<PrometheusHandle> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "authgate=info,tower_http=info".into());

    let prometheus_handle = if config.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");
        describe_metrics();
        Some(handle)
    } else {
        None
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "json" {
        // Flatten event fields so `message` is consistently top-level.
        let fmt_layer = tracing_subscriber::fmt::layer().json().flatten_event(true);
        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer();
        registry.with(fmt_layer).init();
    }

    prometheus_handle
}

fn describe_metrics() {
    metrics::describe_counter!(
        "authgate_kv_operations_total",
        "Total key-value store operations by operation name"
    );
    metrics::describe_counter!(
        "authgate_rate_limit_rejections_total",
        "Requests rejected by the rate limiter, by prefix"
    );
    metrics::describe_counter!(
        "authgate_rate_limit_fallbacks_total",
        "Rate limit checks that fell back to the in-process store"
    );
    metrics::describe_counter!(
        "authgate_activity_events_total",
        "Activity events observed by the log engine, by outcome"
    );
    metrics::describe_counter!(
        "authgate_logins_total",
        "Login attempts by outcome"
    );
}
