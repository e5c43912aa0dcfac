//! Prometheus metrics helpers for Plonk.
//!
//! # Usage
//!
//! ```rust,ignore
//! use plonk_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics().unwrap();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("ingest_events_total", "outcome" => "upserted").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`ingest_`, `shorturl_`, `cache_`, `reconcile_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only low-cardinality ones such as `outcome` or `collection`

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Install the Prometheus recorder and register metric descriptions.
///
/// Fails if a recorder is already installed in this process.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_common_metrics();
    Ok(handle)
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    init_metrics().ok()
}

/// Serve `/metrics` on `port` from a background task.
///
/// The listener is bound before returning, so a port conflict surfaces here
/// rather than inside the spawned task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded across Plonk.
fn register_common_metrics() {
    // =========================================================================
    // Ingestion
    // =========================================================================

    describe_counter!(
        "ingest_events_total",
        "Events seen by the ingester (label: outcome)"
    );
    describe_counter!(
        "ingest_event_errors_total",
        "Events whose storage operation failed"
    );
    describe_counter!(
        "ingest_source_errors_total",
        "Errors reported by the upstream event source"
    );
    describe_gauge!(
        "ingest_running",
        "Whether the ingestion consumer is running (1=yes, 0=no)"
    );
    describe_histogram!(
        "ingest_apply_duration_seconds",
        "Time spent applying one event to the cache"
    );

    // =========================================================================
    // Short URL allocation
    // =========================================================================

    describe_counter!(
        "shorturl_allocations_total",
        "Short URLs handed out by the allocator"
    );
    describe_counter!(
        "shorturl_collisions_total",
        "Candidate short URLs that were already taken"
    );
    describe_gauge!(
        "shorturl_length",
        "Current short URL length used for new allocations"
    );

    // =========================================================================
    // Publish / reconciliation
    // =========================================================================

    describe_counter!(
        "publish_records_total",
        "Records written to remote repositories (label: collection)"
    );
    describe_counter!(
        "publish_cache_failures_total",
        "Optimistic cache writes that failed after a successful publish"
    );
    describe_counter!(
        "reconcile_divergence_total",
        "Stream events whose content differed from the cached row"
    );
}

/// Increment a counter.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}
