use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Interaction Metrics
    pub static ref INTERACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "interactions_total",
        "Total number of chat interactions handled",
        &["kind", "outcome"]
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    pub static ref RATE_LIMIT_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Token bucket admission decisions",
        &["decision"]
    )
    .unwrap();

    // Cache Metrics
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_lookups_total",
        "Cache lookups by cache and result",
        &["cache", "result"]
    )
    .unwrap();

    pub static ref CACHED_USERS: IntGauge = register_int_gauge!(
        "cached_users",
        "Number of user states held in memory"
    )
    .unwrap();

    // Store Metrics
    pub static ref STORE_BATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_batches_total",
        "Write batches committed to the durable store",
        &["status"]
    )
    .unwrap();

    pub static ref STORE_BATCH_SIZE: Histogram = register_histogram!(
        "store_batch_size",
        "Number of writes per committed batch",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
    )
    .unwrap();

    pub static ref STORE_PENDING_WRITES: IntGauge = register_int_gauge!(
        "store_pending_writes",
        "Writes queued but not yet committed"
    )
    .unwrap();

    pub static ref MAINTENANCE_WORKER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "maintenance_worker_ticks_total",
        "Total number of maintenance worker ticks",
        &["status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

pub fn record_cache_hit(cache: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[cache, "hit"]).inc();
}

pub fn record_cache_miss(cache: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[cache, "miss"]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_metrics() {
        INTERACTIONS_TOTAL
            .with_label_values(&["answer", "success"])
            .inc();

        let result = render_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("interactions_total"));
    }
}
