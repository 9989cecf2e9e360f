//! Prometheus metrics
//!
//! The realtime service records the number of live subscriptions through the
//! `metrics` facade; the metrics listener renders whatever recorder is
//! installed in the Prometheus text format.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics::{describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::trace::TraceLayer;

/// Gauge holding the number of open live now-playing streams
pub const SUBSCRIPTION_COUNT: &str = "realtime_subscription_count";

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Install the process-wide Prometheus recorder
pub fn install() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    describe();
    Ok(handle)
}

/// Register metric descriptions with the current recorder
pub fn describe() {
    describe_gauge!(
        SUBSCRIPTION_COUNT,
        Unit::Count,
        "Number of currently open live now-playing streams"
    );
}

pub fn record_subscription_count(count: usize) {
    gauge!(SUBSCRIPTION_COUNT).set(count as f64);
}

/// GET /metrics on its own listener
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(CONTENT_TYPE, TEXT_FORMAT)], handle.render())
}
