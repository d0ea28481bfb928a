//! Shared fixtures for integration tests
//!
//! Temporary SQLite storage plus in-memory fakes of the collaborators the
//! core consumes.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use brandpulse::clock::{Clock, FixedClock};
use brandpulse::errors::{ReportingError, Result};
use brandpulse::services::{
    BrandDirectory, Collaborators, CoreSettings, EnqueueOutcome, IntegrationContext,
    IntegrationResolver, JobEnqueuer, ReportFetcher, ReportRequest, ReportResponse, ReportRow,
    ReportingCore, SyncJob, UpstreamError,
};
use brandpulse::storage::{FactInput, FactKey, FactScope, Platform, SeaOrmStorage, StorageOptions};
use brandpulse::utils::DateRange;
use chrono::{NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const TENANT: &str = "tenant-1";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange::new(start, end).unwrap()
}

/// 2026-03-15 12:00 UTC
pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap(),
    ))
}

/// 创建临时 SQLite 数据库的存储实例
pub async fn create_temp_storage() -> (Arc<SeaOrmStorage>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let storage = SeaOrmStorage::connect(&db_url, StorageOptions::default())
        .await
        .expect("Failed to create storage");
    (Arc::new(storage), temp_dir)
}

/// Seed stored facts for a platform ingested elsewhere
pub async fn seed_facts(
    storage: &SeaOrmStorage,
    brand_id: &str,
    platform: Platform,
    account_id: &str,
    scope: FactScope,
    rows: Vec<FactInput>,
) {
    let start = rows.iter().map(|r| r.date).min().unwrap();
    let end = rows.iter().map(|r| r.date).max().unwrap();
    let key = FactKey {
        tenant_id: TENANT.to_string(),
        brand_id: brand_id.to_string(),
        platform,
        account_id: account_id.to_string(),
        scope,
        range: range(start, end),
    };
    storage
        .replace_facts(&key, rows, 100, Utc::now())
        .await
        .expect("seed facts");
}

pub fn fact(day: NaiveDate, impressions: i64, clicks: i64, spend: f64) -> FactInput {
    FactInput {
        date: day,
        campaign_id: None,
        currency: "USD".to_string(),
        impressions,
        clicks,
        spend,
        ..Default::default()
    }
}

// ============ Report fetcher ============

/// Daily values the fake GA4 upstream reports per account
#[derive(Debug, Clone, Copy)]
pub struct DailyValues {
    pub sessions: f64,
    pub key_events: f64,
    pub revenue: f64,
    pub cost: f64,
    pub impressions: f64,
    pub clicks: f64,
    pub event_count: f64,
}

impl Default for DailyValues {
    fn default() -> Self {
        Self {
            sessions: 10.0,
            key_events: 2.0,
            revenue: 20.0,
            cost: 5.0,
            impressions: 100.0,
            clicks: 10.0,
            event_count: 3.0,
        }
    }
}

/// GA4-shaped fake that counts calls and can reject names, fail or block
#[derive(Default)]
pub struct FakeGa4 {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<ReportRequest>>,
    values: Mutex<BTreeMap<String, DailyValues>>,
    rejected: Mutex<HashSet<String>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    hold_next: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl FakeGa4 {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_values(&self, account_id: &str, values: DailyValues) {
        self.values.lock().insert(account_id.to_string(), values);
    }

    pub fn reject(&self, name: &str) {
        self.rejected.lock().insert(name.to_string());
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// The next fetch signals `entered` and waits for `release`
    pub fn hold_next_fetch(&self) {
        self.hold_next.store(true, Ordering::SeqCst);
    }

    fn metric_value(values: &DailyValues, name: &str) -> f64 {
        match name {
            "sessions" => values.sessions,
            "keyEvents" | "conversions" => values.key_events,
            "totalRevenue" | "purchaseRevenue" => values.revenue,
            "advertiserAdCost" => values.cost,
            "advertiserAdImpressions" => values.impressions,
            "advertiserAdClicks" => values.clicks,
            "eventCount" => values.event_count,
            _ => 0.0,
        }
    }
}

#[async_trait]
impl ReportFetcher for FakeGa4 {
    async fn fetch_report(
        &self,
        request: &ReportRequest,
    ) -> std::result::Result<ReportResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(UpstreamError::transient("upstream unavailable"));
        }
        {
            let rejected = self.rejected.lock();
            if let Some(name) = request.metrics.iter().find(|m| rejected.contains(*m)) {
                return Err(UpstreamError::unsupported_metric(name.clone()));
            }
            if let Some(name) = request.dimensions.iter().find(|d| rejected.contains(*d)) {
                return Err(UpstreamError::unsupported_dimension(name.clone()));
            }
        }

        let values = self
            .values
            .lock()
            .get(&request.account_id)
            .copied()
            .unwrap_or_default();
        let campaign = request.dimensions.len() > 1;
        let mut rows = Vec::new();
        let mut day = request.range.start;
        while day <= request.range.end {
            let campaigns: Vec<Option<&str>> = if campaign {
                vec![Some("c1"), Some("c2")]
            } else {
                vec![None]
            };
            for c in campaigns {
                let mut dimension_values = vec![day.format("%Y%m%d").to_string()];
                if let Some(c) = c {
                    dimension_values.push(c.to_string());
                }
                rows.push(ReportRow {
                    dimension_values,
                    metric_values: request
                        .metrics
                        .iter()
                        .map(|m| Self::metric_value(&values, m).to_string())
                        .collect(),
                });
            }
            day = day.succ_opt().unwrap();
        }

        Ok(ReportResponse {
            dimension_headers: request.dimensions.clone(),
            metric_headers: request.metrics.clone(),
            rows,
            currency: Some("EUR".to_string()),
        })
    }
}

// ============ Integrations ============

#[derive(Default)]
pub struct FakeIntegrations {
    unreadable: Mutex<HashSet<String>>,
}

impl FakeIntegrations {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, account_id: &str) {
        self.unreadable.lock().insert(account_id.to_string());
    }
}

#[async_trait]
impl IntegrationResolver for FakeIntegrations {
    async fn resolve_integration_context(
        &self,
        _tenant_id: &str,
        account_id: &str,
    ) -> Result<IntegrationContext> {
        if self.unreadable.lock().contains(account_id) {
            return Err(ReportingError::not_found(format!(
                "No integration can read {}",
                account_id
            )));
        }
        Ok(IntegrationContext {
            integration_id: "integration-1".to_string(),
            user_id: "user-1".to_string(),
        })
    }
}

// ============ Brands ============

#[derive(Default)]
pub struct FakeBrands {
    brands: Mutex<BTreeMap<String, Vec<String>>>,
}

impl FakeBrands {
    pub fn with(brands: &[&str]) -> Arc<Self> {
        let fake = Self::default();
        fake.brands.lock().insert(
            TENANT.to_string(),
            brands.iter().map(|b| b.to_string()).collect(),
        );
        Arc::new(fake)
    }
}

#[async_trait]
impl BrandDirectory for FakeBrands {
    async fn brand_exists(&self, tenant_id: &str, brand_id: &str) -> Result<bool> {
        Ok(self
            .brands
            .lock()
            .get(tenant_id)
            .is_some_and(|brands| brands.iter().any(|b| b == brand_id)))
    }

    async fn list_brands(&self, tenant_id: &str) -> Result<Vec<String>> {
        Ok(self.brands.lock().get(tenant_id).cloned().unwrap_or_default())
    }
}

// ============ Job enqueuer ============

#[derive(Default)]
pub struct RecordingEnqueuer {
    pub jobs: Mutex<Vec<SyncJob>>,
    pending: Mutex<HashSet<String>>,
}

impl RecordingEnqueuer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl JobEnqueuer for RecordingEnqueuer {
    async fn enqueue(&self, job: SyncJob) -> Result<EnqueueOutcome> {
        if !self.pending.lock().insert(job.job_id.clone()) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        self.jobs.lock().push(job);
        Ok(EnqueueOutcome::Enqueued)
    }
}

// ============ Core ============

pub struct Harness {
    pub core: ReportingCore,
    pub storage: Arc<SeaOrmStorage>,
    pub fetcher: Arc<FakeGa4>,
    pub integrations: Arc<FakeIntegrations>,
    pub enqueuer: Arc<RecordingEnqueuer>,
    pub clock: Arc<FixedClock>,
    _dir: TempDir,
}

pub fn test_settings() -> CoreSettings {
    let mut settings = CoreSettings::from_config(&Default::default());
    settings.query.sync_timeout = Duration::from_secs(5);
    settings
}

pub async fn harness(brands: &[&str]) -> Harness {
    harness_with(brands, test_settings()).await
}

pub async fn harness_with(brands: &[&str], settings: CoreSettings) -> Harness {
    let (storage, dir) = create_temp_storage().await;
    let fetcher = FakeGa4::new();
    let integrations = FakeIntegrations::new();
    let enqueuer = RecordingEnqueuer::new();
    let clock = fixed_clock();
    let core = ReportingCore::new(
        storage.clone(),
        Collaborators {
            fetcher: fetcher.clone(),
            integrations: integrations.clone(),
            brands: FakeBrands::with(brands),
            enqueuer: Some(enqueuer.clone()),
        },
        clock.clone() as Arc<dyn Clock>,
        settings,
    );
    Harness {
        core,
        storage,
        fetcher,
        integrations,
        enqueuer,
        clock,
        _dir: dir,
    }
}
