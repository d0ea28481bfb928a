//! Fact materializer
//!
//! Pulls GA4 reports for a brand's active property and replaces the matching
//! fact rows under the brand lock. Identical concurrent requests share one
//! execution through a short-TTL coalescing cache.

pub mod ga4_schema;
pub mod report;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use self::ga4_schema::{EVENT_NAME_DIMENSION, FieldPlan, MAX_SCHEMA_ATTEMPTS};
use self::report::FactMap;
use crate::cache::BrandCacheInvalidator;
use crate::clock::Clock;
use crate::config::StaticConfig;
use crate::errors::{ReportingError, Result};
use crate::metrics_core::{MetricsRecorder, NoopMetrics};
use crate::services::binding_registry::BindingRegistry;
use crate::services::collaborators::{
    IntegrationResolver, ReportFetcher, ReportFilter, ReportRequest, ReportResponse,
};
use crate::storage::backend::{BaseColumn, bindings, facts, settings};
use crate::storage::models::{
    ActiveAccount, FactInput, FactKey, FactScope, Ga4Settings, Platform, WriteOutcome,
};
use crate::utils::{
    DateRange, build_rolling_range, parse_timezone, range_touches_today, today_in,
};

#[derive(Debug, Clone)]
pub struct MaterializerSettings {
    pub insert_batch_size: usize,
    pub coalesce_ttl: Duration,
    pub coalesce_capacity: u64,
}

impl Default for MaterializerSettings {
    fn default() -> Self {
        Self {
            insert_batch_size: 500,
            coalesce_ttl: Duration::from_secs(30),
            coalesce_capacity: 1000,
        }
    }
}

impl MaterializerSettings {
    pub fn from_config(config: &StaticConfig) -> Self {
        Self {
            insert_batch_size: config.sync.insert_batch_size.max(1),
            coalesce_ttl: Duration::from_secs(config.cache.materialize_coalesce_ttl_secs.max(1)),
            coalesce_capacity: config.cache.materialize_coalesce_capacity,
        }
    }
}

/// What the caller needs fresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessRequest {
    pub tenant_id: String,
    pub brand_id: String,
    pub platform: Platform,
    pub range: DateRange,
    /// Catalog keys of the requested metrics
    pub metrics: Vec<String>,
    /// Requested dimensions plus the fields of any filters
    pub dimensions: Vec<String>,
}

impl FreshnessRequest {
    pub fn scope(&self) -> FactScope {
        if self.dimensions.iter().any(|d| d == "campaign") {
            FactScope::Campaign
        } else {
            FactScope::Aggregated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeOutcome {
    NoActiveAccount,
    /// Closed range already fully materialized
    SkippedClosedRange,
    Materialized { rows: usize },
    /// Active account changed while fetching; nothing written
    Superseded,
    /// Platform facts are written by another ingestion
    Unsupported,
}

impl MaterializeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterializeOutcome::NoActiveAccount => "no_account",
            MaterializeOutcome::SkippedClosedRange => "skipped",
            MaterializeOutcome::Materialized { .. } => "materialized",
            MaterializeOutcome::Superseded => "superseded",
            MaterializeOutcome::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CoalesceKey {
    key: FactKey,
    version: i64,
}

pub struct Materializer {
    registry: Arc<BindingRegistry>,
    fetcher: Arc<dyn ReportFetcher>,
    integrations: Arc<dyn IntegrationResolver>,
    invalidator: Arc<dyn BrandCacheInvalidator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsRecorder>,
    settings: MaterializerSettings,
    in_flight: Cache<CoalesceKey, MaterializeOutcome>,
}

impl Materializer {
    pub fn new(
        registry: Arc<BindingRegistry>,
        fetcher: Arc<dyn ReportFetcher>,
        integrations: Arc<dyn IntegrationResolver>,
        invalidator: Arc<dyn BrandCacheInvalidator>,
        clock: Arc<dyn Clock>,
        settings: MaterializerSettings,
    ) -> Self {
        let in_flight = Cache::builder()
            .max_capacity(settings.coalesce_capacity)
            .time_to_live(settings.coalesce_ttl)
            .build();
        Self {
            registry,
            fetcher,
            integrations,
            invalidator,
            clock,
            metrics: NoopMetrics::arc(),
            settings,
            in_flight,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    /// Make sure facts for the request exist and are as fresh as the upstream allows
    ///
    /// Failures are recorded on the GA4 settings and returned; callers serving
    /// queries log and swallow them.
    pub async fn ensure_fresh(&self, request: &FreshnessRequest) -> Result<MaterializeOutcome> {
        let platform = request.platform;
        if !platform.is_materialized() {
            return Ok(MaterializeOutcome::Unsupported);
        }

        let started = Instant::now();
        let outcome = self.ensure_fresh_inner(request).await;
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_materialization(platform.as_str(), elapsed);

        match &outcome {
            Ok(result) => {
                self.metrics
                    .inc_materialization(platform.as_str(), result.as_str());
            }
            Err(e) => {
                self.metrics
                    .inc_materialization_failure(platform.as_str(), e.code());
                warn!(
                    tenant_id = %request.tenant_id,
                    brand_id = %request.brand_id,
                    platform = platform.as_str(),
                    range = %request.range,
                    "Materialization failed: {}",
                    e
                );
                let now = self.clock.now();
                if let Err(record_err) = self
                    .registry
                    .storage()
                    .record_sync_error(&request.tenant_id, &request.brand_id, now, &e.to_string())
                    .await
                {
                    error!(
                        tenant_id = %request.tenant_id,
                        brand_id = %request.brand_id,
                        "Failed to record sync error: {}",
                        record_err
                    );
                }
            }
        }
        outcome
    }

    async fn ensure_fresh_inner(&self, request: &FreshnessRequest) -> Result<MaterializeOutcome> {
        let (tenant_id, brand_id) = (request.tenant_id.as_str(), request.brand_id.as_str());
        let Some(account) = self
            .registry
            .resolve_active_account(tenant_id, brand_id, request.platform)
            .await?
        else {
            debug!(tenant_id, brand_id, "No active account, nothing to materialize");
            return Ok(MaterializeOutcome::NoActiveAccount);
        };

        let settings = self.registry.ga4_settings(tenant_id, brand_id).await?;
        let key = FactKey {
            tenant_id: tenant_id.to_string(),
            brand_id: brand_id.to_string(),
            platform: request.platform,
            account_id: account.account_id.clone(),
            scope: request.scope(),
            range: request.range,
        };

        let open = range_touches_today(&request.range, &settings.timezone, self.clock.now());
        if !open && self.registry.storage().is_range_covered(&key).await? {
            debug!(tenant_id, brand_id, range = %key.range, "Closed range already materialized");
            return Ok(MaterializeOutcome::SkippedClosedRange);
        }

        let coalesce_key = CoalesceKey {
            key: key.clone(),
            version: account.version,
        };
        self.in_flight
            .try_get_with(coalesce_key, self.materialize(key, account, settings))
            .await
            .map_err(|e: Arc<ReportingError>| (*e).clone())
    }

    async fn materialize(
        &self,
        key: FactKey,
        account: ActiveAccount,
        settings: Ga4Settings,
    ) -> Result<MaterializeOutcome> {
        let context = self
            .integrations
            .resolve_integration_context(&key.tenant_id, &account.account_id)
            .await?;

        let campaign = key.scope == FactScope::Campaign;
        let base_request = ReportRequest {
            tenant_id: key.tenant_id.clone(),
            user_id: context.user_id.clone(),
            account_id: account.account_id.clone(),
            metrics: Vec::new(),
            dimensions: Vec::new(),
            range: key.range,
            filter: None,
        };

        let (response, plan) = self
            .fetch_with_fallback(&base_request, FieldPlan::base(campaign))
            .await?;
        let mut facts = report::base_facts(&response, &plan, &key.range)?;

        let campaign_dimension = plan.campaign_dimension();
        let event_fetches = [
            (BaseColumn::Leads, &settings.lead_event_names),
            (BaseColumn::Conversions, &settings.conversion_event_names),
        ];
        for (target, names) in event_fetches {
            if names.is_empty() {
                continue;
            }
            self.merge_events(&mut facts, &base_request, campaign_dimension, names, target, &key)
                .await?;
        }

        let rows: Vec<_> = facts.into_values().collect();
        let today = today_in(parse_timezone(&settings.timezone), self.clock.now());
        let outcome = self.write(key.clone(), account, rows, today).await?;
        if let WriteOutcome::Written(count) = outcome {
            info!(
                tenant_id = %key.tenant_id,
                brand_id = %key.brand_id,
                account_id = %key.account_id,
                scope = key.scope.as_str(),
                range = %key.range,
                rows = count,
                "Facts materialized"
            );
            self.invalidator
                .invalidate_brand(&key.tenant_id, &key.brand_id, "materialization")
                .await;
            Ok(MaterializeOutcome::Materialized { rows: count })
        } else {
            info!(
                tenant_id = %key.tenant_id,
                brand_id = %key.brand_id,
                account_id = %key.account_id,
                "Active account changed during sync, write abandoned"
            );
            Ok(MaterializeOutcome::Superseded)
        }
    }

    /// Issue the request, renaming or dropping fields the upstream rejects
    async fn fetch_with_fallback(
        &self,
        template: &ReportRequest,
        mut plan: FieldPlan,
    ) -> Result<(ReportResponse, FieldPlan)> {
        for _ in 0..MAX_SCHEMA_ATTEMPTS {
            let mut request = template.clone();
            request.metrics = plan.metric_names();
            request.dimensions = plan.dimension_names();

            match self.fetcher.fetch_report(&request).await {
                Ok(response) => {
                    if !plan.dropped.is_empty() {
                        warn!(
                            account_id = %template.account_id,
                            dropped = ?plan.dropped,
                            "Report fetched without rejected fields"
                        );
                    }
                    return Ok((response, plan));
                }
                Err(e) if e.is_schema_drift() => {
                    let field = plan.apply_rejection(&e)?;
                    self.metrics.inc_schema_fallback(&field);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReportingError::schema_drift(format!(
            "Gave up negotiating the report schema after {} attempts",
            MAX_SCHEMA_ATTEMPTS
        )))
    }

    async fn merge_events(
        &self,
        facts: &mut FactMap,
        template: &ReportRequest,
        campaign_dimension: Option<&'static str>,
        event_names: &[String],
        target: BaseColumn,
        key: &FactKey,
    ) -> Result<()> {
        let mut request = template.clone();
        request.filter = Some(ReportFilter {
            field: EVENT_NAME_DIMENSION.to_string(),
            values: event_names.to_vec(),
        });
        let plan = FieldPlan::event_count(campaign_dimension);
        match self.fetch_with_fallback(&request, plan).await {
            Ok((response, plan)) => {
                report::merge_event_counts(facts, &response, &plan, &key.range, target)
            }
            Err(ReportingError::SchemaDrift(msg)) => {
                // 事件计数不可用时保留主报表的值
                warn!(
                    account_id = %key.account_id,
                    target = ?target,
                    "Event count report unavailable: {}",
                    msg
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Replace-write under the brand lock after re-checking the binding
    async fn write(
        &self,
        key: FactKey,
        expected: ActiveAccount,
        rows: Vec<FactInput>,
        today: NaiveDate,
    ) -> Result<WriteOutcome> {
        let storage = self.registry.storage().clone();
        let now = self.clock.now();
        let covered = key.range.closed_part(today);
        let batch_size = self.settings.insert_batch_size;
        let (tenant_id, brand_id) = (key.tenant_id.clone(), key.brand_id.clone());

        storage
            .with_brand_lock(&tenant_id, &brand_id, move |txn| {
                Box::pin(async move {
                    let current =
                        bindings::active_bindings_in(txn, &key.tenant_id, &key.brand_id, key.platform)
                            .await?;
                    let still_active = current.first().is_some_and(|b| {
                        b.account_id == expected.account_id && b.version == expected.version
                    });
                    if !still_active {
                        return Ok(WriteOutcome::Superseded);
                    }

                    let removed = facts::delete_facts_in(txn, &key).await?;
                    let written = facts::insert_facts_in(txn, &key, &rows, batch_size, now).await?;
                    if let Some(covered) = covered {
                        facts::record_coverage_in(txn, &key, covered, now).await?;
                    }
                    if key.platform == Platform::Ga4 {
                        settings::record_sync_success_in(
                            txn,
                            &key.tenant_id,
                            &key.brand_id,
                            now,
                            covered.map(|c| c.end),
                        )
                        .await?;
                    }
                    debug!(removed, written, "Fact range replaced");
                    Ok(WriteOutcome::Written(written))
                })
            })
            .await
    }

    /// Materialize the brand's trailing `days` days (aggregated scope)
    pub async fn backfill(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
        days: u32,
    ) -> Result<MaterializeOutcome> {
        let settings = self.registry.ga4_settings(tenant_id, brand_id).await?;
        let range = build_rolling_range(days, &settings.timezone, self.clock.now())?;
        self.ensure_fresh(&FreshnessRequest {
            tenant_id: tenant_id.to_string(),
            brand_id: brand_id.to_string(),
            platform,
            range,
            metrics: Vec::new(),
            dimensions: Vec::new(),
        })
        .await
    }
}
