//! Wiring of the reporting core
//!
//! `ReportingCore` owns one instance of every service and exposes the
//! operations the REST layer calls.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::cache::{ConcurrencyGate, ResultCache};
use crate::clock::Clock;
use crate::config::{CacheConfig, StaticConfig};
use crate::errors::Result;
use crate::metrics_core::{MetricsRecorder, NoopMetrics};
use crate::services::binding_registry::{BindingChange, BindingRegistry};
use crate::services::collaborators::{
    BrandDirectory, IntegrationResolver, JobEnqueuer, ReportFetcher,
};
use crate::services::materializer::{
    FreshnessRequest, MaterializeOutcome, Materializer, MaterializerSettings,
};
use crate::services::query::request::QueryRequest;
use crate::services::query::result::QueryResult;
use crate::services::query::{QueryEngine, QuerySettings};
use crate::services::scope_applicator::{ScopeApplicator, ScopeApplySummary, ScopeSelection};
use crate::services::sync_dispatcher::{SyncDispatcher, SyncFailure};
use crate::storage::SeaOrmStorage;
use crate::storage::models::{ActiveAccount, Ga4Defaults, Ga4Settings, Ga4SettingsPatch, Platform};

/// Settings of every component, usually read from `StaticConfig`
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub cache: CacheConfig,
    pub query: QuerySettings,
    pub materializer: MaterializerSettings,
    pub ga4_defaults: Ga4Defaults,
    pub per_brand_concurrency: usize,
    pub scope_apply_parallelism: usize,
    pub backfill_days: u32,
}

impl CoreSettings {
    pub fn from_config(config: &StaticConfig) -> Self {
        Self {
            cache: config.cache.clone(),
            query: QuerySettings::from_config(config),
            materializer: MaterializerSettings::from_config(config),
            ga4_defaults: Ga4Defaults::from_config(&config.sync),
            per_brand_concurrency: config.query.per_brand_concurrency.max(1),
            scope_apply_parallelism: config.sync.scope_apply_parallelism.max(1),
            backfill_days: config.sync.backfill_days,
        }
    }
}

/// External capabilities the core consumes
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ReportFetcher>,
    pub integrations: Arc<dyn IntegrationResolver>,
    pub brands: Arc<dyn BrandDirectory>,
    /// Durable queue for background syncs; the in-process dispatcher when unset
    pub enqueuer: Option<Arc<dyn JobEnqueuer>>,
}

pub struct ReportingCore {
    storage: Arc<SeaOrmStorage>,
    cache: Arc<ResultCache<QueryResult>>,
    registry: Arc<BindingRegistry>,
    materializer: Arc<Materializer>,
    engine: QueryEngine,
    applicator: ScopeApplicator,
    dispatcher: Arc<SyncDispatcher>,
    sync_failures: Mutex<Option<mpsc::UnboundedReceiver<SyncFailure>>>,
}

impl ReportingCore {
    pub fn new(
        storage: Arc<SeaOrmStorage>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        settings: CoreSettings,
    ) -> Self {
        Self::with_metrics(storage, collaborators, clock, settings, NoopMetrics::arc())
    }

    pub fn with_metrics(
        storage: Arc<SeaOrmStorage>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        settings: CoreSettings,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        let cache = Arc::new(ResultCache::from_config(&settings.cache).with_metrics(metrics.clone()));
        let registry = Arc::new(BindingRegistry::new(
            storage.clone(),
            cache.clone(),
            clock.clone(),
            settings.ga4_defaults.clone(),
        ));
        let materializer = Arc::new(
            Materializer::new(
                registry.clone(),
                collaborators.fetcher,
                collaborators.integrations,
                cache.clone(),
                clock.clone(),
                settings.materializer.clone(),
            )
            .with_metrics(metrics.clone()),
        );
        let gate = Arc::new(ConcurrencyGate::new(settings.per_brand_concurrency));
        let engine = QueryEngine::new(
            storage.clone(),
            registry.clone(),
            materializer.clone(),
            collaborators.brands.clone(),
            cache.clone(),
            gate,
            clock,
            settings.query.clone(),
        )
        .with_metrics(metrics.clone());

        let (dispatcher, failures) = SyncDispatcher::new(materializer.clone(), settings.backfill_days);
        let dispatcher = Arc::new(dispatcher.with_metrics(metrics.clone()));
        let enqueuer: Arc<dyn JobEnqueuer> = match collaborators.enqueuer {
            Some(enqueuer) => enqueuer,
            None => dispatcher.clone(),
        };
        let applicator = ScopeApplicator::new(
            registry.clone(),
            collaborators.brands,
            enqueuer,
            settings.scope_apply_parallelism,
        )
        .with_metrics(metrics);

        Self {
            storage,
            cache,
            registry,
            materializer,
            engine,
            applicator,
            dispatcher,
            sync_failures: Mutex::new(Some(failures)),
        }
    }

    // ============ Queries ============

    pub async fn query_metrics(&self, tenant_id: &str, request: &QueryRequest) -> Result<QueryResult> {
        self.engine.query_metrics(tenant_id, request).await
    }

    pub async fn ensure_fresh(&self, request: &FreshnessRequest) -> Result<MaterializeOutcome> {
        self.materializer.ensure_fresh(request).await
    }

    // ============ Bindings ============

    pub async fn resolve_active_account(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
    ) -> Result<Option<ActiveAccount>> {
        self.registry
            .resolve_active_account(tenant_id, brand_id, platform)
            .await
    }

    pub async fn set_active_account(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<BindingChange> {
        self.registry
            .set_active_account(tenant_id, brand_id, platform, account_id)
            .await
    }

    pub async fn apply_scope_selection(
        &self,
        tenant_id: &str,
        selection: &ScopeSelection,
    ) -> Result<ScopeApplySummary> {
        self.applicator.apply_scope_selection(tenant_id, selection).await
    }

    // ============ Settings & cache ============

    pub async fn ga4_settings(&self, tenant_id: &str, brand_id: &str) -> Result<Ga4Settings> {
        self.registry.ga4_settings(tenant_id, brand_id).await
    }

    pub async fn update_ga4_settings(
        &self,
        tenant_id: &str,
        brand_id: &str,
        patch: Ga4SettingsPatch,
    ) -> Result<Ga4Settings> {
        self.registry
            .update_ga4_settings(tenant_id, brand_id, patch)
            .await
    }

    /// Drop every cached result of the brand
    pub fn invalidate_cache(&self, tenant_id: &str, brand_id: &str) {
        self.cache.invalidate(tenant_id, brand_id);
    }

    // ============ Accessors ============

    pub fn storage(&self) -> &Arc<SeaOrmStorage> {
        &self.storage
    }

    pub fn dispatcher(&self) -> &Arc<SyncDispatcher> {
        &self.dispatcher
    }

    /// Failure channel of the in-process dispatcher; `None` after the first call
    pub fn take_sync_failures(&self) -> Option<mpsc::UnboundedReceiver<SyncFailure>> {
        self.sync_failures.lock().take()
    }
}
