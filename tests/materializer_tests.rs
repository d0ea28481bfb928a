//! Fact materializer integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use brandpulse::cache::NoopInvalidator;
use brandpulse::clock::Clock;
use brandpulse::errors::ReportingError;
use brandpulse::services::{
    BindingRegistry, EnqueueOutcome, FreshnessRequest, JobEnqueuer, MaterializeOutcome,
    Materializer, MaterializerSettings, SyncJob,
};
use brandpulse::storage::{Ga4Defaults, Platform};
use brandpulse::utils::DateRange;
use common::*;

const BRAND: &str = "brand-1";
const PROPERTY: &str = "properties/1";

fn freshness(range: DateRange, dimensions: &[&str]) -> FreshnessRequest {
    FreshnessRequest {
        tenant_id: TENANT.to_string(),
        brand_id: BRAND.to_string(),
        platform: Platform::Ga4,
        range,
        metrics: vec!["sessions".to_string()],
        dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
    }
}

fn closed_week() -> DateRange {
    range(date(2026, 3, 1), date(2026, 3, 7))
}

async fn bound_harness() -> Harness {
    let h = harness(&[BRAND]).await;
    h.core
        .set_active_account(TENANT, BRAND, Platform::Ga4, PROPERTY)
        .await
        .unwrap();
    h
}

#[tokio::test]
async fn test_closed_range_is_materialized_once() {
    let h = bound_harness().await;

    let outcome = h.core.ensure_fresh(&freshness(closed_week(), &["date"])).await.unwrap();
    assert_eq!(outcome, MaterializeOutcome::Materialized { rows: 7 });
    // 基础报表 + generate_lead 事件计数
    assert_eq!(h.fetcher.calls(), 2);
    assert_eq!(
        h.storage
            .count_facts(TENANT, BRAND, Platform::Ga4, Some(PROPERTY))
            .await
            .unwrap(),
        7
    );

    let again = h.core.ensure_fresh(&freshness(closed_week(), &["date"])).await.unwrap();
    assert_eq!(again, MaterializeOutcome::SkippedClosedRange);
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_coverage_survives_a_new_materializer() {
    let h = bound_harness().await;
    h.core.ensure_fresh(&freshness(closed_week(), &[])).await.unwrap();

    let clock = h.clock.clone() as Arc<dyn Clock>;
    let registry = Arc::new(BindingRegistry::new(
        h.storage.clone(),
        Arc::new(NoopInvalidator),
        clock.clone(),
        Ga4Defaults::default(),
    ));
    let fresh = Materializer::new(
        registry,
        h.fetcher.clone(),
        h.integrations.clone(),
        Arc::new(NoopInvalidator),
        clock,
        MaterializerSettings::default(),
    );

    let outcome = fresh.ensure_fresh(&freshness(closed_week(), &[])).await.unwrap();
    assert_eq!(outcome, MaterializeOutcome::SkippedClosedRange);
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_open_range_is_fetched_again() {
    let mut settings = test_settings();
    settings.materializer.coalesce_ttl = Duration::from_millis(20);
    let h = harness_with(&[BRAND], settings).await;
    h.core
        .set_active_account(TENANT, BRAND, Platform::Ga4, PROPERTY)
        .await
        .unwrap();

    let open = range(date(2026, 3, 10), date(2026, 3, 15));
    let first = h.core.ensure_fresh(&freshness(open, &[])).await.unwrap();
    assert_eq!(first, MaterializeOutcome::Materialized { rows: 6 });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = h.core.ensure_fresh(&freshness(open, &[])).await.unwrap();
    assert_eq!(second, MaterializeOutcome::Materialized { rows: 6 });
    assert_eq!(h.fetcher.calls(), 4);
    assert_eq!(
        h.storage
            .count_facts(TENANT, BRAND, Platform::Ga4, None)
            .await
            .unwrap(),
        6
    );
}

#[tokio::test]
async fn test_no_binding_means_nothing_to_do() {
    let h = harness(&[BRAND]).await;
    let outcome = h.core.ensure_fresh(&freshness(closed_week(), &[])).await.unwrap();
    assert_eq!(outcome, MaterializeOutcome::NoActiveAccount);
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_non_materialized_platform_is_unsupported() {
    let h = bound_harness().await;
    let mut request = freshness(closed_week(), &[]);
    request.platform = Platform::Meta;
    assert_eq!(
        h.core.ensure_fresh(&request).await.unwrap(),
        MaterializeOutcome::Unsupported
    );
}

#[tokio::test]
async fn test_switch_during_fetch_abandons_the_write() {
    let h = bound_harness().await;
    h.fetcher.hold_next_fetch();

    let request = freshness(closed_week(), &[]);
    let (outcome, _) = tokio::join!(h.core.ensure_fresh(&request), async {
        h.fetcher.entered.notified().await;
        h.core
            .set_active_account(TENANT, BRAND, Platform::Ga4, "properties/2")
            .await
            .unwrap();
        h.fetcher.release.notify_one();
    });

    assert_eq!(outcome.unwrap(), MaterializeOutcome::Superseded);
    assert_eq!(
        h.storage
            .count_facts(TENANT, BRAND, Platform::Ga4, Some(PROPERTY))
            .await
            .unwrap(),
        0
    );
    let active = h
        .core
        .resolve_active_account(TENANT, BRAND, Platform::Ga4)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.account_id, "properties/2");
}

#[tokio::test]
async fn test_renamed_metric_falls_back_to_alternate() {
    let h = bound_harness().await;
    h.fetcher.reject("keyEvents");

    let outcome = h.core.ensure_fresh(&freshness(closed_week(), &[])).await.unwrap();
    assert_eq!(outcome, MaterializeOutcome::Materialized { rows: 7 });

    let requests = h.fetcher.requests.lock();
    assert!(
        requests
            .iter()
            .any(|r| r.metrics.iter().any(|m| m == "conversions"))
    );
    assert!(
        requests
            .last()
            .is_some_and(|r| r.metrics.iter().all(|m| m != "keyEvents"))
    );
}

#[tokio::test]
async fn test_rejected_campaign_dimension_aborts_without_writing() {
    let h = bound_harness().await;
    h.fetcher.reject("sessionCampaignId");
    h.fetcher.reject("campaignId");

    let err = h
        .core
        .ensure_fresh(&freshness(closed_week(), &["campaign"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReportingError::SchemaDrift(_)));
    assert_eq!(
        h.storage
            .count_facts(TENANT, BRAND, Platform::Ga4, None)
            .await
            .unwrap(),
        0
    );

    let settings = h.core.ga4_settings(TENANT, BRAND).await.unwrap();
    assert!(settings.last_error.is_some());
    assert!(settings.last_error_at.is_some());
}

#[tokio::test]
async fn test_upstream_failure_is_recorded() {
    let h = bound_harness().await;
    h.fetcher.set_failing(true);

    let err = h.core.ensure_fresh(&freshness(closed_week(), &[])).await.unwrap_err();
    assert!(matches!(err, ReportingError::Upstream(_)));
    let settings = h.core.ga4_settings(TENANT, BRAND).await.unwrap();
    assert!(settings.last_error.is_some());
    assert!(settings.last_sync_at.is_none());
}

#[tokio::test]
async fn test_concurrent_identical_requests_share_one_fetch() {
    let h = bound_harness().await;
    h.fetcher.set_delay(Duration::from_millis(100));

    let request = freshness(closed_week(), &[]);
    let outcomes = futures_util::future::join_all((0..5).map(|_| h.core.ensure_fresh(&request))).await;

    for outcome in outcomes {
        assert_eq!(outcome.unwrap(), MaterializeOutcome::Materialized { rows: 7 });
    }
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_successful_sync_advances_backfill_cursor() {
    let h = bound_harness().await;
    h.core.ensure_fresh(&freshness(closed_week(), &[])).await.unwrap();

    let settings = h.core.ga4_settings(TENANT, BRAND).await.unwrap();
    assert!(settings.last_sync_at.is_some());
    assert_eq!(settings.backfill_cursor.as_deref(), Some("2026-03-07"));
}

#[tokio::test]
async fn test_dispatcher_dedupes_pending_jobs() {
    let h = bound_harness().await;
    h.fetcher.set_delay(Duration::from_millis(50));
    let dispatcher = h.core.dispatcher().clone();

    let job = SyncJob::ga4(TENANT, BRAND, PROPERTY);
    assert_eq!(dispatcher.enqueue(job.clone()).await.unwrap(), EnqueueOutcome::Enqueued);
    assert_eq!(dispatcher.enqueue(job.clone()).await.unwrap(), EnqueueOutcome::Duplicate);
    assert!(dispatcher.is_pending(&job.job_id));

    dispatcher.wait_idle().await;
    assert_eq!(dispatcher.pending_jobs(), 0);
    // 默认回填 30 天，以 2026-03-15 结尾
    assert_eq!(
        h.storage
            .count_facts(TENANT, BRAND, Platform::Ga4, Some(PROPERTY))
            .await
            .unwrap(),
        30
    );
}

#[tokio::test]
async fn test_dispatcher_reports_failures() {
    let h = bound_harness().await;
    h.fetcher.set_failing(true);
    let mut failures = h.core.take_sync_failures().unwrap();
    assert!(h.core.take_sync_failures().is_none());

    let job = SyncJob::ga4(TENANT, BRAND, PROPERTY);
    h.core.dispatcher().enqueue(job.clone()).await.unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.job.job_id, job.job_id);
    assert_eq!(failure.code, "E008");
}
