//! Brand platform-binding registry integration tests

mod common;

use brandpulse::errors::ReportingError;
use brandpulse::services::{FreshnessRequest, MaterializeOutcome};
use brandpulse::storage::{FactScope, Ga4SettingsPatch, Platform};
use chrono::{Duration, Utc};
use common::*;
use migration::entities::{brand_ga4_settings, brand_platform_binding};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

const BRAND: &str = "brand-1";

#[tokio::test]
async fn test_set_then_resolve() {
    let h = harness(&[BRAND]).await;
    assert!(
        h.core
            .resolve_active_account(TENANT, BRAND, Platform::Meta)
            .await
            .unwrap()
            .is_none()
    );

    let change = h
        .core
        .set_active_account(TENANT, BRAND, Platform::Meta, "act_1")
        .await
        .unwrap();
    assert!(change.changed);
    assert!(change.binding.is_active());

    let active = h
        .core
        .resolve_active_account(TENANT, BRAND, Platform::Meta)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.account_id, "act_1");
    assert_eq!(active.version, change.binding.version);
}

#[tokio::test]
async fn test_switch_purges_facts_of_the_previous_account() {
    let h = harness(&[BRAND]).await;
    h.core
        .set_active_account(TENANT, BRAND, Platform::Meta, "act_1")
        .await
        .unwrap();
    seed_facts(
        &h.storage,
        BRAND,
        Platform::Meta,
        "act_1",
        FactScope::Aggregated,
        vec![fact(date(2026, 3, 1), 100, 10, 1.0), fact(date(2026, 3, 2), 100, 10, 1.0)],
    )
    .await;

    let change = h
        .core
        .set_active_account(TENANT, BRAND, Platform::Meta, "act_2")
        .await
        .unwrap();
    assert!(change.changed);

    assert_eq!(
        h.storage
            .count_facts(TENANT, BRAND, Platform::Meta, Some("act_1"))
            .await
            .unwrap(),
        0
    );
    let bindings = h.storage.list_bindings(TENANT, BRAND).await.unwrap();
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings.iter().filter(|b| b.is_active()).count(), 1);
    assert_eq!(
        h.storage.active_platforms(TENANT, BRAND).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_rebinding_the_same_account_is_a_no_op() {
    let h = harness(&[BRAND]).await;
    let first = h
        .core
        .set_active_account(TENANT, BRAND, Platform::Ga4, "properties/1")
        .await
        .unwrap();
    let again = h
        .core
        .set_active_account(TENANT, BRAND, Platform::Ga4, " properties/1 ")
        .await
        .unwrap();

    assert!(!again.changed);
    assert_eq!(again.binding.version, first.binding.version);
    assert_eq!(h.storage.list_bindings(TENANT, BRAND).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ga4_settings_mirror_the_active_property() {
    let h = harness(&[BRAND]).await;
    h.core
        .set_active_account(TENANT, BRAND, Platform::Ga4, "properties/1")
        .await
        .unwrap();
    let second = h
        .core
        .set_active_account(TENANT, BRAND, Platform::Ga4, "properties/2")
        .await
        .unwrap();

    let settings = h.core.ga4_settings(TENANT, BRAND).await.unwrap();
    assert_eq!(settings.property_id.as_deref(), Some("properties/2"));
    assert_eq!(settings.binding_version, second.binding.version);
    assert_eq!(settings.timezone, "UTC");
    assert_eq!(settings.lead_event_names, vec!["generate_lead".to_string()]);
}

#[tokio::test]
async fn test_blank_ids_are_rejected() {
    let h = harness(&[BRAND]).await;
    let err = h
        .core
        .set_active_account(TENANT, BRAND, Platform::Ga4, "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, ReportingError::Validation(_)));

    let err = h
        .core
        .set_active_account(TENANT, " ", Platform::Ga4, "properties/1")
        .await
        .unwrap_err();
    assert!(matches!(err, ReportingError::Validation(_)));
}

#[tokio::test]
async fn test_settings_update_validates_timezone() {
    let h = harness(&[BRAND]).await;

    let err = h
        .core
        .update_ga4_settings(
            TENANT,
            BRAND,
            Ga4SettingsPatch {
                timezone: Some("Not/AZone".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);

    let updated = h
        .core
        .update_ga4_settings(
            TENANT,
            BRAND,
            Ga4SettingsPatch {
                timezone: Some("Europe/Berlin".to_string()),
                lead_event_names: Some(vec!["form_submit".to_string(), "form_submit".to_string()]),
                conversion_event_names: Some(vec!["purchase".to_string()]),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.timezone, "Europe/Berlin");
    assert_eq!(updated.lead_event_names, vec!["form_submit".to_string()]);
    assert_eq!(updated.conversion_event_names, vec!["purchase".to_string()]);
}

#[tokio::test]
async fn test_duplicate_active_rows_are_reconciled() {
    let h = harness(&[BRAND]).await;
    let now = Utc::now();
    for (account, updated_at, version) in [
        ("act_old", now - Duration::hours(2), 1),
        ("act_new", now, 2),
    ] {
        brand_platform_binding::ActiveModel {
            tenant_id: Set(TENANT.to_string()),
            brand_id: Set(BRAND.to_string()),
            platform: Set("meta".to_string()),
            account_id: Set(account.to_string()),
            status: Set("ACTIVE".to_string()),
            version: Set(version),
            created_at: Set(updated_at),
            updated_at: Set(updated_at),
            ..Default::default()
        }
        .insert(h.storage.get_db())
        .await
        .unwrap();
    }
    seed_facts(
        &h.storage,
        BRAND,
        Platform::Meta,
        "act_old",
        FactScope::Aggregated,
        vec![fact(date(2026, 3, 1), 100, 10, 1.0)],
    )
    .await;

    let active = h
        .core
        .resolve_active_account(TENANT, BRAND, Platform::Meta)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.account_id, "act_new");

    let still_active = h
        .storage
        .active_bindings(TENANT, BRAND, Platform::Meta)
        .await
        .unwrap();
    assert_eq!(still_active.len(), 1);
    assert_eq!(
        h.storage
            .count_facts(TENANT, BRAND, Platform::Meta, Some("act_old"))
            .await
            .unwrap(),
        0
    );
}

/// Bindings moved to `properties/2` without the GA4 settings following
async fn diverge_ga4_binding(h: &Harness) {
    brand_platform_binding::Entity::update_many()
        .col_expr(
            brand_platform_binding::Column::Status,
            Expr::value("DISCONNECTED"),
        )
        .filter(brand_platform_binding::Column::AccountId.eq("properties/1"))
        .exec(h.storage.get_db())
        .await
        .unwrap();
    let now = Utc::now();
    brand_platform_binding::ActiveModel {
        tenant_id: Set(TENANT.to_string()),
        brand_id: Set(BRAND.to_string()),
        platform: Set("ga4".to_string()),
        account_id: Set("properties/2".to_string()),
        status: Set("ACTIVE".to_string()),
        version: Set(7),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(h.storage.get_db())
    .await
    .unwrap();
}

#[tokio::test]
async fn test_stale_ga4_settings_follow_the_active_binding() {
    let h = harness(&[BRAND]).await;
    h.core
        .set_active_account(TENANT, BRAND, Platform::Ga4, "properties/1")
        .await
        .unwrap();
    diverge_ga4_binding(&h).await;

    let active = h
        .core
        .resolve_active_account(TENANT, BRAND, Platform::Ga4)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.account_id, "properties/2");
    assert_eq!(active.version, 7);

    let settings = h.core.ga4_settings(TENANT, BRAND).await.unwrap();
    assert_eq!(settings.property_id.as_deref(), Some("properties/2"));
    assert_eq!(settings.binding_version, 7);

    let request = FreshnessRequest {
        tenant_id: TENANT.to_string(),
        brand_id: BRAND.to_string(),
        platform: Platform::Ga4,
        range: range(date(2026, 3, 1), date(2026, 3, 3)),
        metrics: vec!["sessions".to_string()],
        dimensions: vec!["date".to_string()],
    };
    let outcome = h.core.ensure_fresh(&request).await.unwrap();
    assert_eq!(outcome, MaterializeOutcome::Materialized { rows: 3 });
    assert_eq!(
        h.storage
            .count_facts(TENANT, BRAND, Platform::Ga4, Some("properties/2"))
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn test_ga4_settings_without_active_binding_are_cleared() {
    let h = harness(&[BRAND]).await;
    h.core
        .set_active_account(TENANT, BRAND, Platform::Ga4, "properties/1")
        .await
        .unwrap();
    brand_platform_binding::Entity::update_many()
        .col_expr(
            brand_platform_binding::Column::Status,
            Expr::value("DISCONNECTED"),
        )
        .exec(h.storage.get_db())
        .await
        .unwrap();

    assert!(
        h.core
            .resolve_active_account(TENANT, BRAND, Platform::Ga4)
            .await
            .unwrap()
            .is_none()
    );
    let row = brand_ga4_settings::Entity::find()
        .filter(brand_ga4_settings::Column::BrandId.eq(BRAND))
        .one(h.storage.get_db())
        .await
        .unwrap()
        .unwrap();
    assert!(row.property_id.is_none());
}
