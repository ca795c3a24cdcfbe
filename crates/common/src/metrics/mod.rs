//! Metrics and observability utilities
//!
//! Records pipeline metrics through the `metrics` facade with
//! standardized naming conventions. Without an installed recorder every
//! call is a no-op, so library users opt in by installing an exporter.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

/// Metrics prefix for all RagForge metrics
pub const METRICS_PREFIX: &str = "ragforge";

/// Register all metric descriptions
pub fn register_metrics() {
    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned from the last search"
    );

    // Rerank metrics
    describe_histogram!(
        format!("{}_rerank_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Rerank latency in seconds"
    );

    // Context metrics
    describe_counter!(
        format!("{}_context_truncations_total", METRICS_PREFIX),
        Unit::Count,
        "Contexts that could not fit every offered candidate"
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

    // Generation metrics
    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "LLM generation latency in seconds"
    );

    describe_counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Prompt and completion tokens consumed"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, strategy: &str, result_count: usize) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .set(result_count as f64);
}

/// Helper to record rerank metrics
pub fn record_rerank(duration_secs: f64, strategy: &str) {
    histogram!(
        format!("{}_rerank_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a truncated context
pub fn record_context_truncation(template: &str) {
    counter!(
        format!("{}_context_truncations_total", METRICS_PREFIX),
        "template" => template.to_string()
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
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

    tracing::trace!(model, batch_size, status, "Embedding request recorded");
}

/// Helper to record generation metrics
pub fn record_generation(
    duration_secs: f64,
    model: &str,
    prompt_tokens: usize,
    completion_tokens: usize,
) {
    histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);

    counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "kind" => "prompt"
    )
    .increment(prompt_tokens as u64);

    counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "kind" => "completion"
    )
    .increment(completion_tokens as u64);
}
