//! Metrics and observability utilities
//!
//! Records query, retrieval, generation and cache metrics through the `metrics`
//! facade with standardized naming conventions. No exporter is installed here;
//! the host process attaches whichever recorder it uses.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all RagForge metrics
pub const METRICS_PREFIX: &str = "ragforge";

/// Register all metric descriptions
pub fn register_metrics() {
    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of RAG queries by strategy and outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    // Retrieval metrics
    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval latency in seconds"
    );

    describe_gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of items returned from retrieval"
    );

    describe_counter!(
        format!("{}_retrieval_degradations_total", METRICS_PREFIX),
        Unit::Count,
        "Retrieval components that degraded to an empty result"
    );

    // Generation metrics
    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Answer generation latency in seconds"
    );

    describe_counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Prompt and completion tokens consumed"
    );

    describe_counter!(
        format!("{}_generation_cost_micros_total", METRICS_PREFIX),
        Unit::Count,
        "Estimated generation cost in millionths of a dollar"
    );

    // Enhancement metrics
    describe_counter!(
        format!("{}_enhancements_total", METRICS_PREFIX),
        Unit::Count,
        "Query enhancement calls by kind and outcome"
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

    // Index metrics
    describe_gauge!(
        format!("{}_keyword_index_documents", METRICS_PREFIX),
        Unit::Count,
        "Documents in the published keyword index snapshot"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record a finished query
pub fn record_query(duration_secs: f64, strategy: &str, outcome: &str) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, strategy: &str, result_count: usize) {
    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .set(result_count as f64);
}

/// Helper to record a retrieval component that was absorbed as empty
pub fn record_degradation(component: &str) {
    counter!(
        format!("{}_retrieval_degradations_total", METRICS_PREFIX),
        "component" => component.to_string()
    )
    .increment(1);
}

/// Helper to record generation metrics
pub fn record_generation(
    duration_secs: f64,
    model: &str,
    input_tokens: usize,
    output_tokens: usize,
    cost: f64,
) {
    histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);

    counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "kind" => "input"
    )
    .increment(input_tokens as u64);

    counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "kind" => "output"
    )
    .increment(output_tokens as u64);

    counter!(
        format!("{}_generation_cost_micros_total", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .increment((cost * 1_000_000.0).round() as u64);
}

/// Helper to record an enhancement attempt
pub fn record_enhancement(kind: &str, applied: bool) {
    let outcome = if applied { "applied" } else { "fallback" };
    counter!(
        format!("{}_enhancements_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string(),
            "batch" => batch_size.to_string()
        )
        .record(duration_secs);
    }
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

/// Helper to record the size of a newly published keyword index
pub fn record_keyword_index(documents: usize) {
    gauge!(format!("{}_keyword_index_documents", METRICS_PREFIX)).set(documents as f64);
}
