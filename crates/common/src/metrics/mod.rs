//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the receipt pipeline and its upstream
//! services, with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ReceiptFlow metrics
pub const METRICS_PREFIX: &str = "receiptflow";

/// Histogram buckets for upstream calls and whole-pipeline latency (in seconds).
/// OCR and uploads routinely take seconds, so the tail is wide.
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_receipts_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Receipts inserted into the target database"
    );

    describe_counter!(
        format!("{}_receipts_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Receipts that did not reach the database, by failing stage"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end receipt processing latency in seconds"
    );

    // Upstream metrics
    describe_counter!(
        format!("{}_upstream_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Calls to external services"
    );

    describe_histogram!(
        format!("{}_upstream_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "External service call latency in seconds"
    );

    // Mapping metrics
    describe_counter!(
        format!("{}_relation_lookups_total", METRICS_PREFIX),
        Unit::Count,
        "Relation lookups by outcome"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record one external service call
pub fn record_upstream(service: &str, operation: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_upstream_requests_total", METRICS_PREFIX),
        "service" => service.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_upstream_duration_seconds", METRICS_PREFIX),
        "service" => service.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a pipeline run that reached the database
pub fn record_receipt_processed(duration_secs: f64, extractor: &str) {
    counter!(
        format!("{}_receipts_processed_total", METRICS_PREFIX),
        "extractor" => extractor.to_string()
    )
    .increment(1);

    histogram!(format!("{}_pipeline_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record a pipeline run that stopped at `stage`
pub fn record_receipt_failed(stage: &str) {
    counter!(
        format!("{}_receipts_failed_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Helper to record a relation lookup outcome (found, not_found, error)
pub fn record_relation_lookup(property: &str, outcome: &str) {
    counter!(
        format!("{}_relation_lookups_total", METRICS_PREFIX),
        "property" => property.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
