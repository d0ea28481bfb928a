//! Metrics query engine
//!
//! Validates a declarative query, refreshes facts best-effort within a hard
//! deadline, runs the grouped/totals/count aggregates under the brand's
//! concurrency gate and caches the assembled result.

pub mod catalog;
pub mod plan;
pub mod request;
pub mod result;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{debug, warn};

use self::plan::{NormalizedQuery, PageLimits, compare_range};
use self::request::QueryRequest;
use self::result::{CompareBlock, QueryMeta, QueryResult, SyncStatus, build_section};
use crate::cache::{ConcurrencyGate, ResultCache};
use crate::clock::Clock;
use crate::config::StaticConfig;
use crate::errors::{ReportingError, Result};
use crate::metrics_core::{MetricsRecorder, NoopMetrics};
use crate::services::binding_registry::BindingRegistry;
use crate::services::collaborators::BrandDirectory;
use crate::services::materializer::{FreshnessRequest, MaterializeOutcome, Materializer};
use crate::storage::SeaOrmStorage;
use crate::storage::backend::PlatformScope;
use crate::storage::models::Platform;
use crate::utils::DateRange;

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub limits: PageLimits,
    /// Deadline for materialization done on behalf of a query
    pub sync_timeout: Duration,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            limits: PageLimits::default(),
            sync_timeout: Duration::from_millis(8000),
        }
    }
}

impl QuerySettings {
    pub fn from_config(config: &StaticConfig) -> Self {
        Self {
            limits: PageLimits {
                default_page_size: config.query.default_page_size.max(1),
                max_page_size: config.query.max_page_size.max(1),
            },
            sync_timeout: Duration::from_millis(config.query.sync_timeout_ms),
        }
    }
}

pub struct QueryEngine {
    storage: Arc<SeaOrmStorage>,
    registry: Arc<BindingRegistry>,
    materializer: Arc<Materializer>,
    brands: Arc<dyn BrandDirectory>,
    cache: Arc<ResultCache<QueryResult>>,
    gate: Arc<ConcurrencyGate>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsRecorder>,
    settings: QuerySettings,
}

impl QueryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<SeaOrmStorage>,
        registry: Arc<BindingRegistry>,
        materializer: Arc<Materializer>,
        brands: Arc<dyn BrandDirectory>,
        cache: Arc<ResultCache<QueryResult>>,
        gate: Arc<ConcurrencyGate>,
        clock: Arc<dyn Clock>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            storage,
            registry,
            materializer,
            brands,
            cache,
            gate,
            clock,
            metrics: NoopMetrics::arc(),
            settings,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Answer a metrics query for `tenant_id`
    pub async fn query_metrics(&self, tenant_id: &str, request: &QueryRequest) -> Result<QueryResult> {
        let started = Instant::now();
        let outcome = self.query_cached(tenant_id, request).await;
        self.metrics.observe_query(started.elapsed().as_secs_f64());
        self.metrics.inc_query(match &outcome {
            Ok(_) => "ok",
            Err(ReportingError::Validation(_)) => "validation",
            Err(ReportingError::NotFound(_)) => "not_found",
            Err(ReportingError::MissingConnections(_)) => "missing_connections",
            Err(_) => "error",
        });
        outcome
    }

    async fn query_cached(&self, tenant_id: &str, request: &QueryRequest) -> Result<QueryResult> {
        let query = NormalizedQuery::from_request(request, self.settings.limits)?;
        let fingerprint = query.fingerprint(self.clock.now())?;
        let key = self.cache.key(tenant_id, &query.brand_id, &fingerprint);
        self.cache
            .get_or_populate(key, || self.execute(tenant_id, &query))
            .await
    }

    async fn execute(&self, tenant_id: &str, query: &NormalizedQuery) -> Result<QueryResult> {
        let brand_id = query.brand_id.as_str();
        if !self.brands.brand_exists(tenant_id, brand_id).await? {
            return Err(ReportingError::not_found(format!(
                "Brand '{}' not found",
                brand_id
            )));
        }

        let connected = self.storage.active_platforms(tenant_id, brand_id).await?;
        let missing: Vec<Platform> = query.platforms.difference(&connected).copied().collect();
        if !missing.is_empty() {
            return Err(ReportingError::missing_connections(missing));
        }
        let platforms: BTreeSet<Platform> = if query.platforms.is_empty() {
            connected
        } else {
            query.platforms.clone()
        };

        let settings = self.registry.ga4_settings(tenant_id, brand_id).await?;
        let now = self.clock.now();
        let range = query.range.resolve(&settings.timezone, now)?;
        let compare = query
            .compare_to
            .map(|mode| compare_range(&range, mode))
            .transpose()?;

        let sync = self
            .refresh(tenant_id, query, &platforms, range, compare)
            .await;

        // 同步之后再取账号：切换过的属性以新账号为准
        let mut scopes = Vec::with_capacity(platforms.len());
        let mut sync_status = sync;
        for platform in &platforms {
            match self
                .registry
                .resolve_active_account(tenant_id, brand_id, *platform)
                .await?
            {
                Some(account) => scopes.push(PlatformScope {
                    platform: *platform,
                    account_id: account.account_id,
                    partition: query.scope(),
                }),
                None => {
                    sync_status.insert(*platform, SyncStatus::NoAccount);
                }
            }
        }

        let entries = query.entries();
        let bases = query.base_columns();
        let primary_spec = query.aggregate_spec(tenant_id, range, scopes.clone());
        let compare_spec = compare.map(|r| query.aggregate_spec(tenant_id, r, scopes));

        let storage = &self.storage;
        let (primary, compared) = self
            .gate
            .run(tenant_id, brand_id, async {
                let primary = storage.aggregate(&primary_spec).await?;
                let compared = match &compare_spec {
                    Some(spec) => Some(storage.aggregate(spec).await?),
                    None => None,
                };
                Ok((primary, compared))
            })
            .await?;

        let section = build_section(
            &primary,
            &query.dimensions,
            &entries,
            &bases,
            query.limit,
            query.offset,
        );
        let compare_block = match (compare, compared) {
            (Some(range), Some(output)) => {
                let s = build_section(
                    &output,
                    &query.dimensions,
                    &entries,
                    &bases,
                    query.limit,
                    query.offset,
                );
                Some(CompareBlock {
                    range,
                    rows: s.rows,
                    totals: s.totals,
                    page_info: s.page_info,
                })
            }
            _ => None,
        };

        debug!(
            tenant_id,
            brand_id,
            range = %range,
            rows = section.rows.len(),
            "Query executed"
        );
        Ok(QueryResult {
            meta: QueryMeta {
                brand_id: brand_id.to_string(),
                timezone: settings.timezone,
                range,
                compare_range: compare,
                compare_to: query.compare_to,
                platforms: platforms.into_iter().collect(),
                sync: sync_status,
                generated_at: now,
            },
            rows: section.rows,
            totals: section.totals,
            page_info: section.page_info,
            compare: compare_block,
        })
    }

    /// Best-effort materialization of every platform and window, bounded by
    /// the sync deadline. Work still running at the deadline keeps going in
    /// the background.
    async fn refresh(
        &self,
        tenant_id: &str,
        query: &NormalizedQuery,
        platforms: &BTreeSet<Platform>,
        range: DateRange,
        compare: Option<DateRange>,
    ) -> BTreeMap<Platform, SyncStatus> {
        let mut statuses = BTreeMap::new();
        let mut tasks = Vec::new();

        for platform in platforms {
            if !platform.is_materialized() {
                statuses.insert(*platform, SyncStatus::Unsupported);
                continue;
            }
            for window in std::iter::once(range).chain(compare) {
                let request = FreshnessRequest {
                    tenant_id: tenant_id.to_string(),
                    brand_id: query.brand_id.clone(),
                    platform: *platform,
                    range: window,
                    metrics: query.metrics.clone(),
                    dimensions: query.referenced_fields(),
                };
                let materializer = self.materializer.clone();
                let primary = window == range;
                let handle =
                    tokio::spawn(async move { materializer.ensure_fresh(&request).await });
                tasks.push((*platform, primary, handle));
            }
        }
        if tasks.is_empty() {
            return statuses;
        }

        let deadline = self.settings.sync_timeout;
        let waits = tasks.into_iter().map(|(platform, primary, handle)| async move {
            let status = match tokio::time::timeout(deadline, handle).await {
                Ok(Ok(Ok(outcome))) => status_of(outcome),
                Ok(Ok(Err(_))) => SyncStatus::Stale,
                Ok(Err(join_err)) => {
                    warn!(platform = platform.as_str(), "Materialization task failed: {}", join_err);
                    SyncStatus::Stale
                }
                Err(_) => {
                    warn!(
                        platform = platform.as_str(),
                        timeout_ms = deadline.as_millis() as u64,
                        "Materialization exceeded the query deadline, serving stored facts"
                    );
                    self.metrics
                        .inc_materialization_failure(platform.as_str(), "timeout");
                    SyncStatus::Stale
                }
            };
            (platform, primary, status)
        });

        for (platform, primary, status) in join_all(waits).await {
            if primary {
                statuses.insert(platform, status);
            } else if status == SyncStatus::Stale {
                statuses.entry(platform).or_insert(SyncStatus::Stale);
            }
        }
        statuses
    }
}

fn status_of(outcome: MaterializeOutcome) -> SyncStatus {
    match outcome {
        MaterializeOutcome::Materialized { .. } => SyncStatus::Fresh,
        MaterializeOutcome::SkippedClosedRange => SyncStatus::Skipped,
        MaterializeOutcome::Superseded => SyncStatus::Superseded,
        MaterializeOutcome::NoActiveAccount => SyncStatus::NoAccount,
        MaterializeOutcome::Unsupported => SyncStatus::Unsupported,
    }
}
