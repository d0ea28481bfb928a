//! Metrics module tests
//!
//! These tests require the `metrics` feature to be enabled:
//!   cargo test --features metrics --test metrics_tests

#![cfg(feature = "metrics")]

use brandpulse::metrics::{METRICS, PrometheusMetricsWrapper};
use brandpulse::metrics_core::{MetricsRecorder, NoopMetrics, default_recorder};

// =============================================================================
// NoopMetrics Tests
// =============================================================================

#[test]
fn test_noop_metrics_implements_trait() {
    let noop = NoopMetrics::new();
    noop.inc_cache_hit("result");
    noop.inc_cache_miss("result");
    noop.inc_cache_invalidation("binding_switch");
    noop.inc_materialization("ga4", "materialized");
    noop.inc_materialization_failure("ga4", "timeout");
    noop.observe_materialization("ga4", 0.2);
    noop.inc_schema_fallback("keyEvents");
    noop.inc_query("ok");
    noop.observe_query(0.01);
    noop.inc_scope_apply("ok");
    noop.inc_background_sync("enqueued");
    noop.observe_lock_wait("sqlite", 0.001);
    noop.observe_db_query("aggregate", 0.005);
}

// =============================================================================
// Prometheus wrapper
// =============================================================================

#[test]
fn test_wrapper_records_into_global_registry() {
    let recorder = PrometheusMetricsWrapper;
    recorder.inc_query("validation");
    recorder.inc_materialization("ga4", "skipped");
    recorder.observe_query(0.02);

    let text = METRICS.export();
    assert!(text.contains("brandpulse_queries_total"));
    assert!(text.contains("outcome=\"validation\"") || text.contains("validation"));
    assert!(text.contains("brandpulse_materializations_total"));
    assert!(text.contains("brandpulse_query_duration_seconds"));
}

#[test]
fn test_default_recorder_is_prometheus_backed() {
    let recorder = default_recorder();
    recorder.inc_background_sync("duplicate");
    assert!(METRICS.export().contains("brandpulse_background_sync_total"));
}
