// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, TextEncoder, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of HTTP exchanges currently in flight.
    pub static ref ACTIVE_EXCHANGES: Gauge =
        register_gauge!("feedgate_active_exchanges", "Number of HTTP exchanges currently being served.").unwrap();
    /// The number of live sessions.
    pub static ref LIVE_SESSIONS: Gauge =
        register_gauge!("feedgate_live_sessions", "Number of live client sessions.").unwrap();

    // --- Server-wide Counters ---
    /// The total number of content requests served to the indexer's crawler.
    pub static ref GSA_CONTENT_REQUESTS_TOTAL: Counter =
        register_counter!("feedgate_gsa_content_requests_total", "Total content requests served to the indexer.").unwrap();
    /// The total number of content requests served to other clients.
    pub static ref NON_GSA_REQUESTS_TOTAL: Counter =
        register_counter!("feedgate_non_gsa_requests_total", "Total content requests served to non-indexer clients.").unwrap();
    /// The total number of document ids pushed to the indexer.
    pub static ref DOC_IDS_PUSHED_TOTAL: Counter =
        register_counter!("feedgate_doc_ids_pushed_total", "Total document ids pushed to the indexer.").unwrap();
    /// The total number of feed uploads rejected by the indexer.
    pub static ref FEEDS_REJECTED_TOTAL: Counter =
        register_counter!("feedgate_feeds_rejected_total", "Total feed uploads the indexer rejected.").unwrap();
    /// The total number of adaptor calls cut short by the watchdog.
    pub static ref WATCHDOG_TRIPS_TOTAL: Counter =
        register_counter!("feedgate_watchdog_trips_total", "Total adaptor calls interrupted by the watchdog.").unwrap();

    // --- Histograms ---
    /// A histogram of content-serving latencies.
    pub static ref CONTENT_LATENCY_SECONDS: Histogram =
        register_histogram!("feedgate_content_latency_seconds", "Latency of content request processing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text
/// format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
