//! Core metrics traits (always compiled, no feature gate).
//!
//! Provides `MetricsRecorder` trait and `NoopMetrics` so that every component
//! can accept `Arc<dyn MetricsRecorder>` unconditionally. When the `metrics`
//! feature is disabled, `NoopMetrics` is injected and every call is a no-op.

use std::sync::Arc;

/// Trait for recording application metrics.
///
/// All methods are no-op by default, allowing partial implementation.
/// Implementations must be thread-safe (Send + Sync).
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync {
    // ===== Result cache =====

    /// Record cache hit
    fn inc_cache_hit(&self, layer: &str) {}

    /// Record cache miss
    fn inc_cache_miss(&self, layer: &str) {}

    /// Record a brand-wide invalidation
    fn inc_cache_invalidation(&self, reason: &str) {}

    // ===== Materializer =====

    /// Record materialization outcome (materialized, skipped, superseded, ...)
    fn inc_materialization(&self, platform: &str, outcome: &str) {}

    /// Record a swallowed materialization failure
    fn inc_materialization_failure(&self, platform: &str, kind: &str) {}

    /// Observe materialization duration
    fn observe_materialization(&self, platform: &str, duration_secs: f64) {}

    /// Record an upstream schema fallback (metric/dimension renamed or dropped)
    fn inc_schema_fallback(&self, field: &str) {}

    // ===== Query engine =====

    /// Record query outcome (ok, validation, not_found, missing_connections, error)
    fn inc_query(&self, outcome: &str) {}

    /// Observe query duration
    fn observe_query(&self, duration_secs: f64) {}

    // ===== Scope applicator / background sync =====

    /// Record per-brand scope apply result
    fn inc_scope_apply(&self, result: &str) {}

    /// Record background sync job status (enqueued, duplicate, ok, failed)
    fn inc_background_sync(&self, status: &str) {}

    // ===== Database =====

    /// Observe brand lock wait time
    fn observe_lock_wait(&self, backend: &str, duration_secs: f64) {}

    /// Observe database query duration
    fn observe_db_query(&self, operation: &str, duration_secs: f64) {}
}

/// Noop metrics implementation for testing and non-metrics builds.
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {}

impl NoopMetrics {
    pub fn new() -> Self {
        Self
    }

    pub fn arc() -> Arc<dyn MetricsRecorder> {
        Arc::new(Self::new())
    }
}

impl Default for NoopMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 根据编译特性选择默认的指标记录器
pub fn default_recorder() -> Arc<dyn MetricsRecorder> {
    #[cfg(feature = "metrics")]
    {
        Arc::new(crate::metrics::PrometheusMetricsWrapper)
    }
    #[cfg(not(feature = "metrics"))]
    {
        NoopMetrics::arc()
    }
}
