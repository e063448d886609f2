// src/db/monitoring.rs

use std::future::Future;
use std::time::Instant;

use log::{debug, error};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

/// Process-wide metrics for dao operations.
pub static DB_QUERY_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scripts_db_query_total",
        "Total number of DB queries executed",
        &["operation"]
    )
    .expect("Failed to create DB_QUERY_COUNTER")
});

pub static DB_QUERY_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scripts_db_query_errors_total",
        "Total number of DB queries that returned an error",
        &["operation"]
    )
    .expect("Failed to create DB_QUERY_ERRORS")
});

pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "scripts_db_query_duration_seconds",
        "Duration of DB queries in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to create DB_QUERY_DURATION")
});

/// Times `f` and records it under `operation`.
pub async fn measure_db_operation<F, T, E>(operation: &str, f: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let result = f.await;
    let secs = start.elapsed().as_secs_f64();

    DB_QUERY_COUNTER.with_label_values(&[operation]).inc();
    DB_QUERY_DURATION.with_label_values(&[operation]).observe(secs);
    if result.is_err() {
        DB_QUERY_ERRORS.with_label_values(&[operation]).inc();
    }

    debug!("DB operation {} took {:.4} seconds", operation, secs);
    result
}

/// Prometheus text exposition of every registered metric.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_measure_counts_calls_and_errors() {
        let op = "monitoring_test_op";
        let calls = DB_QUERY_COUNTER.with_label_values(&[op]).get();
        let errors = DB_QUERY_ERRORS.with_label_values(&[op]).get();

        let ok: Result<i32, String> = measure_db_operation(op, async { Ok(1) }).await;
        assert_eq!(ok, Ok(1));
        let err: Result<i32, String> = measure_db_operation(op, async { Err("no".into()) }).await;
        assert!(err.is_err());

        assert_eq!(DB_QUERY_COUNTER.with_label_values(&[op]).get(), calls + 2);
        assert_eq!(DB_QUERY_ERRORS.with_label_values(&[op]).get(), errors + 1);
    }

    #[tokio::test]
    async fn test_gather_contains_recorded_operation() {
        let _: Result<(), ()> = measure_db_operation("gather_test_op", async { Ok(()) }).await;
        let text = gather_metrics();
        assert!(text.contains("scripts_db_query_total"));
        assert!(text.contains("gather_test_op"));
    }
}
