//! Prometheus metrics module
//!
//! Provides metrics collection and export for monitoring.
//!
//! # Feature
//! This module requires the `metrics` feature to be enabled.

mod registry;

pub use registry::{METRICS, Metrics};

use crate::metrics_core::MetricsRecorder;

/// Wrapper that delegates to the global METRICS singleton.
///
/// `Lazy<Metrics>` is not `Clone`, so this zero-sized handle is what gets
/// injected as `Arc<dyn MetricsRecorder>`.
pub struct PrometheusMetricsWrapper;

impl MetricsRecorder for PrometheusMetricsWrapper {
    fn inc_cache_hit(&self, layer: &str) {
        METRICS.cache_hits_total.with_label_values(&[layer]).inc();
    }

    fn inc_cache_miss(&self, layer: &str) {
        METRICS.cache_misses_total.with_label_values(&[layer]).inc();
    }

    fn inc_cache_invalidation(&self, reason: &str) {
        METRICS
            .cache_invalidations_total
            .with_label_values(&[reason])
            .inc();
    }

    fn inc_materialization(&self, platform: &str, outcome: &str) {
        METRICS
            .materializations_total
            .with_label_values(&[platform, outcome])
            .inc();
    }

    fn inc_materialization_failure(&self, platform: &str, kind: &str) {
        METRICS
            .materialization_failures_total
            .with_label_values(&[platform, kind])
            .inc();
    }

    fn observe_materialization(&self, platform: &str, duration_secs: f64) {
        METRICS
            .materialization_duration_seconds
            .with_label_values(&[platform])
            .observe(duration_secs);
    }

    fn inc_schema_fallback(&self, field: &str) {
        METRICS
            .schema_fallbacks_total
            .with_label_values(&[field])
            .inc();
    }

    fn inc_query(&self, outcome: &str) {
        METRICS.queries_total.with_label_values(&[outcome]).inc();
    }

    fn observe_query(&self, duration_secs: f64) {
        METRICS.query_duration_seconds.observe(duration_secs);
    }

    fn inc_scope_apply(&self, result: &str) {
        METRICS.scope_apply_total.with_label_values(&[result]).inc();
    }

    fn inc_background_sync(&self, status: &str) {
        METRICS
            .background_sync_total
            .with_label_values(&[status])
            .inc();
    }

    fn observe_lock_wait(&self, backend: &str, duration_secs: f64) {
        METRICS
            .lock_wait_seconds
            .with_label_values(&[backend])
            .observe(duration_secs);
    }

    fn observe_db_query(&self, operation: &str, duration_secs: f64) {
        METRICS
            .db_query_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}
