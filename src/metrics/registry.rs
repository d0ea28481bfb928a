//! Global metrics registry
//!
//! Defines all Prometheus metrics used by the reporting core.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

/// Global metrics instance
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Application metrics container
pub struct Metrics {
    registry: Registry,

    // ===== Cache metrics =====
    pub cache_hits_total: CounterVec,
    pub cache_misses_total: CounterVec,
    pub cache_invalidations_total: CounterVec,

    // ===== Materializer metrics =====
    pub materializations_total: CounterVec,
    pub materialization_failures_total: CounterVec,
    pub materialization_duration_seconds: HistogramVec,
    pub schema_fallbacks_total: CounterVec,

    // ===== Query metrics =====
    pub queries_total: CounterVec,
    pub query_duration_seconds: Histogram,

    // ===== Scope / sync metrics =====
    pub scope_apply_total: CounterVec,
    pub background_sync_total: CounterVec,

    // ===== Database metrics =====
    pub lock_wait_seconds: HistogramVec,
    pub db_query_duration_seconds: HistogramVec,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    CounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("Failed to create {} metric: {}", name, e))
}

fn histogram_vec(name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    HistogramVec::new(
        HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS.to_vec()),
        labels,
    )
    .unwrap_or_else(|e| panic!("Failed to create {} metric: {}", name, e))
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let cache_hits_total = counter(
            "brandpulse_cache_hits_total",
            "Total cache hits by layer",
            &["layer"],
        );
        let cache_misses_total = counter(
            "brandpulse_cache_misses_total",
            "Total cache misses by layer",
            &["layer"],
        );
        let cache_invalidations_total = counter(
            "brandpulse_cache_invalidations_total",
            "Brand-wide result cache invalidations by reason",
            &["reason"],
        );
        let materializations_total = counter(
            "brandpulse_materializations_total",
            "Materialization outcomes by platform",
            &["platform", "outcome"],
        );
        let materialization_failures_total = counter(
            "brandpulse_materialization_failures_total",
            "Swallowed materialization failures by platform and kind",
            &["platform", "kind"],
        );
        let materialization_duration_seconds = histogram_vec(
            "brandpulse_materialization_duration_seconds",
            "Materialization latency",
            &["platform"],
        );
        let schema_fallbacks_total = counter(
            "brandpulse_schema_fallbacks_total",
            "Upstream schema drift fallbacks by field",
            &["field"],
        );
        let queries_total = counter(
            "brandpulse_queries_total",
            "Metrics queries by outcome",
            &["outcome"],
        );
        let query_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("brandpulse_query_duration_seconds", "Metrics query latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )
        .unwrap_or_else(|e| panic!("Failed to create query_duration_seconds metric: {}", e));
        let scope_apply_total = counter(
            "brandpulse_scope_apply_total",
            "Per-brand property scope apply results",
            &["result"],
        );
        let background_sync_total = counter(
            "brandpulse_background_sync_total",
            "Background sync jobs by status",
            &["status"],
        );
        let lock_wait_seconds = histogram_vec(
            "brandpulse_lock_wait_seconds",
            "Brand lock wait time by backend",
            &["backend"],
        );
        let db_query_duration_seconds = histogram_vec(
            "brandpulse_db_query_duration_seconds",
            "Database query latency by operation",
            &["operation"],
        );

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(cache_hits_total.clone()),
            Box::new(cache_misses_total.clone()),
            Box::new(cache_invalidations_total.clone()),
            Box::new(materializations_total.clone()),
            Box::new(materialization_failures_total.clone()),
            Box::new(materialization_duration_seconds.clone()),
            Box::new(schema_fallbacks_total.clone()),
            Box::new(queries_total.clone()),
            Box::new(query_duration_seconds.clone()),
            Box::new(scope_apply_total.clone()),
            Box::new(background_sync_total.clone()),
            Box::new(lock_wait_seconds.clone()),
            Box::new(db_query_duration_seconds.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .unwrap_or_else(|e| panic!("Failed to register metric: {}", e));
        }

        Self {
            registry,
            cache_hits_total,
            cache_misses_total,
            cache_invalidations_total,
            materializations_total,
            materialization_failures_total,
            materialization_duration_seconds,
            schema_fallbacks_total,
            queries_total,
            query_duration_seconds,
            scope_apply_total,
            background_sync_total,
            lock_wait_seconds,
            db_query_duration_seconds,
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
