//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram,
    gauge, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all Citewise metrics
pub const METRICS_PREFIX: &str = "citewise";

/// SLO-aligned histogram buckets for request latency (in seconds)
///
/// A chat request spans three external calls, so the tail reaches further
/// than a plain search API.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s - P50 target
    5.000,  // 5s
    10.00,  // 10s - P99 target
    20.00,  // 20s
    30.00,  // 30s
    60.00,  // 60s
];

/// Buckets for external service latency (embedding, search, completion)
pub const EXTERNAL_CALL_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
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

    // Answer metrics
    describe_counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Questions processed, labelled answered or unavailable"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end question latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search query latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of candidates returned from search"
    );

    describe_counter!(
        format!("{}_search_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total search backend errors"
    );

    // Completion metrics
    describe_counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total chat completion requests"
    );

    describe_histogram!(
        format!("{}_completion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Chat completion latency in seconds"
    );

    describe_counter!(
        format!("{}_completion_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total chat completion errors"
    );

    // Packing metrics
    describe_gauge!(
        format!("{}_context_candidates_considered", METRICS_PREFIX),
        Unit::Count,
        "Candidates examined by the last packing pass"
    );

    describe_gauge!(
        format!("{}_context_candidates_included", METRICS_PREFIX),
        Unit::Count,
        "Candidates included by the last packing pass"
    );

    describe_histogram!(
        format!("{}_context_tokens", METRICS_PREFIX),
        Unit::Count,
        "Token count of packed context"
    );

    describe_counter!(
        format!("{}_tokenizer_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Token counts that could not be measured"
    );

    // Resilience metrics
    describe_counter!(
        format!("{}_external_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Retries of external calls after transient failures"
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

fn status_label(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status_label(success)
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, backend: &str, result_count: usize, success: bool) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "backend" => backend.to_string(),
        "status" => status_label(success)
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_search_duration_seconds", METRICS_PREFIX),
            "backend" => backend.to_string()
        )
        .record(duration_secs);

        gauge!(
            format!("{}_search_results_count", METRICS_PREFIX),
            "backend" => backend.to_string()
        )
        .set(result_count as f64);
    } else {
        counter!(
            format!("{}_search_errors_total", METRICS_PREFIX),
            "backend" => backend.to_string()
        )
        .increment(1);
    }
}

/// Helper to record completion metrics
pub fn record_completion(duration_secs: f64, model: &str, success: bool) {
    counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status_label(success)
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_completion_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_completion_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record the result of one packing pass
pub fn record_packing(considered: usize, included: usize, token_count: usize, estimated: bool) {
    gauge!(format!("{}_context_candidates_considered", METRICS_PREFIX)).set(considered as f64);
    gauge!(format!("{}_context_candidates_included", METRICS_PREFIX)).set(included as f64);

    histogram!(
        format!("{}_context_tokens", METRICS_PREFIX),
        "estimated" => estimated.to_string()
    )
    .record(token_count as f64);
}

/// Helper to record a token count that could not be measured
pub fn record_tokenizer_failure(model: &str) {
    counter!(
        format!("{}_tokenizer_failures_total", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .increment(1);
}

/// Helper to record a retried external call
pub fn record_retry(service: &str) {
    counter!(
        format!("{}_external_retries_total", METRICS_PREFIX),
        "service" => service.to_string()
    )
    .increment(1);
}

/// Helper to record the outcome of one question
pub fn record_answer(outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_pipeline_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}
