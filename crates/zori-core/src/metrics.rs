//! Prometheus metrics helpers for the Zori pipeline.
//!
//! # Usage
//!
//! ```rust,ignore
//! use zori_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("gateway_requests_total", "outcome" => "accepted").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`gateway_`, `enrich_`, `clickhouse_`, `dedupe_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: low-cardinality only (outcome, stage). Never project or visitor ids.

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds `0.0.0.0:<port>` and serves `/metrics` from a background task.
/// Returns once the listener is bound.
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
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

/// Register descriptions for the metrics used across Zori.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Gateway
    // =========================================================================

    describe_counter!(
        "gateway_requests_total",
        "Ingest requests by outcome (accepted, bad_request, unauthorized, not_found)"
    );
    describe_counter!(
        "gateway_bytes_total",
        "Body bytes of accepted ingest requests"
    );
    describe_counter!(
        "gateway_published_total",
        "Event frames acknowledged by the stream"
    );
    describe_counter!(
        "gateway_publish_errors_total",
        "Event frames that could not be published (dropped)"
    );
    describe_counter!(
        "gateway_project_cache_misses_total",
        "Project token lookups that went to the project store"
    );

    // =========================================================================
    // Enrichment processor
    // =========================================================================

    describe_counter!(
        "enrich_messages_total",
        "Stream messages handled by outcome (acked, nacked, terminated, duplicate)"
    );
    describe_counter!(
        "enrich_stage_errors_total",
        "Enrichment stage failures (label: stage)"
    );
    describe_counter!(
        "enrich_decode_errors_total",
        "Stream messages whose payload is not a valid event frame"
    );
    describe_gauge!(
        "enrich_running",
        "Whether the enrichment processor is consuming (1=yes, 0=no)"
    );

    // =========================================================================
    // ClickHouse sink
    // =========================================================================

    describe_counter!(
        "clickhouse_events_inserted_total",
        "Events inserted into ClickHouse"
    );
    describe_counter!("clickhouse_insert_errors_total", "ClickHouse insert errors");
    describe_histogram!(
        "clickhouse_insert_duration_seconds",
        "Time spent on a single ClickHouse insert"
    );

    // =========================================================================
    // Dedupe index
    // =========================================================================

    describe_counter!("dedupe_lookups_total", "Total dedupe index lookups");
    describe_counter!(
        "dedupe_hits_total",
        "Dedupe index hits (event already persisted)"
    );
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Increment a counter by `count`.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Increment a counter carrying a single `outcome` label.
#[inline]
pub fn record_outcome(name: &'static str, outcome: &'static str) {
    metrics::counter!(name, "outcome" => outcome).increment(1);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}
