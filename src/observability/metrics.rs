//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by endpoint, route, status
//! - `gateway_request_duration_seconds` (histogram): latency by endpoint, route
//! - `gateway_connections_rejected_total` (counter): refused admissions by reason
//! - `gateway_handshake_failures_total` (counter): failed TLS handshakes by endpoint
//! - `gateway_upstream_failures_total` (counter): unreachable or slow upstreams
//! - `broker_messages_published_total` / `broker_messages_discarded_total` (counters)
//! - `broker_deliveries_total` (counter): deliveries by mode
//! - `broker_slow_consumers_total` (counter): event streams dropped for lagging
//! - `broker_active_subscriptions`, `broker_channels` (gauges)
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until a recorder is installed
//! - The Prometheus exporter is opt-in and listens on its own address

use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once per process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle.clone());
    Ok(handle)
}

/// Serve `/metrics` on `addr` until `shutdown` resolves.
pub async fn serve_metrics<F>(handle: PrometheusHandle, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Metrics endpoint listening");
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

/// Record a completed request.
pub fn record_request(endpoint: &str, route: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "endpoint" => endpoint.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "endpoint" => endpoint.to_string(),
        "route" => route.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_connection_rejected(reason: &'static str) {
    metrics::counter!("gateway_connections_rejected_total", "reason" => reason).increment(1);
}

pub fn record_handshake_failure(endpoint: &'static str) {
    metrics::counter!("gateway_handshake_failures_total", "endpoint" => endpoint).increment(1);
}

pub fn record_upstream_failure(upstream: &str) {
    metrics::counter!("gateway_upstream_failures_total", "upstream" => upstream.to_string()).increment(1);
}

/// Record a publish; zero deliveries counts as a discard.
pub fn record_published(delivered: usize) {
    metrics::counter!("broker_messages_published_total").increment(1);
    if delivered == 0 {
        metrics::counter!("broker_messages_discarded_total").increment(1);
    }
}

pub fn record_delivery(mode: &'static str) {
    metrics::counter!("broker_deliveries_total", "mode" => mode).increment(1);
}

pub fn record_slow_consumer() {
    metrics::counter!("broker_slow_consumers_total").increment(1);
}

pub fn set_active_subscriptions(count: usize) {
    metrics::gauge!("broker_active_subscriptions").set(count as f64);
}

pub fn set_channels(count: usize) {
    metrics::gauge!("broker_channels").set(count as f64);
}
