//! 品牌级 GA4 规范设置

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

use migration::entities::brand_ga4_settings;

use super::SeaOrmStorage;
use super::retry;
use crate::errors::Result;
use crate::storage::models::{Ga4Defaults, Ga4Settings, Ga4SettingsPatch};

const MAX_ERROR_LEN: usize = 1000;

fn to_settings(model: brand_ga4_settings::Model) -> Result<Ga4Settings> {
    Ok(Ga4Settings {
        lead_event_names: serde_json::from_str(&model.lead_event_names)?,
        conversion_event_names: serde_json::from_str(&model.conversion_event_names)?,
        tenant_id: model.tenant_id,
        brand_id: model.brand_id,
        property_id: model.property_id,
        binding_version: model.binding_version,
        timezone: model.timezone,
        last_sync_at: model.last_sync_at,
        last_error_at: model.last_error_at,
        last_error: model.last_error,
        backfill_cursor: model.backfill_cursor,
        updated_at: model.updated_at,
    })
}

async fn find_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
) -> std::result::Result<Option<brand_ga4_settings::Model>, sea_orm::DbErr> {
    brand_ga4_settings::Entity::find()
        .filter(brand_ga4_settings::Column::TenantId.eq(tenant_id))
        .filter(brand_ga4_settings::Column::BrandId.eq(brand_id))
        .one(conn)
        .await
}

/// 不存在时按默认值插入（并发插入由唯一索引去重）
async fn insert_default_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
    defaults: &Ga4Defaults,
    now: DateTime<Utc>,
) -> Result<()> {
    let model = brand_ga4_settings::ActiveModel {
        tenant_id: Set(tenant_id.to_string()),
        brand_id: Set(brand_id.to_string()),
        property_id: Set(None),
        binding_version: Set(0),
        timezone: Set(defaults.timezone.clone()),
        lead_event_names: Set(serde_json::to_string(&defaults.lead_event_names)?),
        conversion_event_names: Set(serde_json::to_string(&defaults.conversion_event_names)?),
        last_sync_at: Set(None),
        last_error_at: Set(None),
        last_error: Set(None),
        backfill_cursor: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let result = brand_ga4_settings::Entity::insert(model)
        .on_conflict(
            OnConflict::columns([
                brand_ga4_settings::Column::TenantId,
                brand_ga4_settings::Column::BrandId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec(conn)
        .await;
    match result {
        Ok(_) | Err(sea_orm::DbErr::RecordNotInserted) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// 设置中缓存的 (属性, 绑定版本)
pub(crate) async fn property_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
) -> Result<Option<(String, i64)>> {
    let model = find_in(conn, tenant_id, brand_id).await?;
    Ok(model.and_then(|m| m.property_id.map(|p| (p, m.binding_version))))
}

/// 写入规范属性与绑定版本，必要时懒创建
pub(crate) async fn set_property_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
    property_id: Option<&str>,
    binding_version: i64,
    defaults: &Ga4Defaults,
    now: DateTime<Utc>,
) -> Result<()> {
    insert_default_in(conn, tenant_id, brand_id, defaults, now).await?;
    brand_ga4_settings::Entity::update_many()
        .col_expr(
            brand_ga4_settings::Column::PropertyId,
            Expr::value(property_id.map(str::to_string)),
        )
        .col_expr(
            brand_ga4_settings::Column::BindingVersion,
            Expr::value(binding_version),
        )
        .col_expr(brand_ga4_settings::Column::UpdatedAt, Expr::value(now))
        .filter(brand_ga4_settings::Column::TenantId.eq(tenant_id))
        .filter(brand_ga4_settings::Column::BrandId.eq(brand_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// 记录一次成功同步
pub(crate) async fn record_sync_success_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
    at: DateTime<Utc>,
    backfill_cursor: Option<NaiveDate>,
) -> Result<()> {
    let mut update = brand_ga4_settings::Entity::update_many()
        .col_expr(brand_ga4_settings::Column::LastSyncAt, Expr::value(Some(at)))
        .col_expr(brand_ga4_settings::Column::UpdatedAt, Expr::value(at));
    if let Some(cursor) = backfill_cursor {
        update = update.col_expr(
            brand_ga4_settings::Column::BackfillCursor,
            Expr::value(Some(cursor.format("%Y-%m-%d").to_string())),
        );
    }
    update
        .filter(brand_ga4_settings::Column::TenantId.eq(tenant_id))
        .filter(brand_ga4_settings::Column::BrandId.eq(brand_id))
        .exec(conn)
        .await?;
    Ok(())
}

impl SeaOrmStorage {
    pub async fn get_ga4_settings(
        &self,
        tenant_id: &str,
        brand_id: &str,
    ) -> Result<Option<Ga4Settings>> {
        let db = &self.db;
        let model = retry::with_retry("get_ga4_settings", self.retry_config(), || async {
            find_in(db, tenant_id, brand_id).await
        })
        .await?;
        model.map(to_settings).transpose()
    }

    /// 获取设置，不存在则按默认值创建
    pub async fn ensure_ga4_settings(
        &self,
        tenant_id: &str,
        brand_id: &str,
        defaults: &Ga4Defaults,
        now: DateTime<Utc>,
    ) -> Result<Ga4Settings> {
        if let Some(settings) = self.get_ga4_settings(tenant_id, brand_id).await? {
            return Ok(settings);
        }
        insert_default_in(&self.db, tenant_id, brand_id, defaults, now).await?;
        let model = find_in(&self.db, tenant_id, brand_id).await?.ok_or_else(|| {
            crate::errors::ReportingError::internal(format!(
                "GA4 settings for {}/{} vanished after insert",
                tenant_id, brand_id
            ))
        })?;
        to_settings(model)
    }

    /// 应用局部更新（时区、事件名列表）
    pub async fn update_ga4_settings(
        &self,
        tenant_id: &str,
        brand_id: &str,
        patch: &Ga4SettingsPatch,
        defaults: &Ga4Defaults,
        now: DateTime<Utc>,
    ) -> Result<Ga4Settings> {
        self.ensure_ga4_settings(tenant_id, brand_id, defaults, now)
            .await?;

        let mut update = brand_ga4_settings::Entity::update_many()
            .col_expr(brand_ga4_settings::Column::UpdatedAt, Expr::value(now));
        if let Some(tz) = &patch.timezone {
            update = update.col_expr(brand_ga4_settings::Column::Timezone, Expr::value(tz.clone()));
        }
        if let Some(names) = &patch.lead_event_names {
            update = update.col_expr(
                brand_ga4_settings::Column::LeadEventNames,
                Expr::value(serde_json::to_string(names)?),
            );
        }
        if let Some(names) = &patch.conversion_event_names {
            update = update.col_expr(
                brand_ga4_settings::Column::ConversionEventNames,
                Expr::value(serde_json::to_string(names)?),
            );
        }
        update
            .filter(brand_ga4_settings::Column::TenantId.eq(tenant_id))
            .filter(brand_ga4_settings::Column::BrandId.eq(brand_id))
            .exec(&self.db)
            .await?;

        let model = find_in(&self.db, tenant_id, brand_id).await?.ok_or_else(|| {
            crate::errors::ReportingError::not_found(format!(
                "GA4 settings for {}/{}",
                tenant_id, brand_id
            ))
        })?;
        to_settings(model)
    }

    /// 记录同步失败（单条语句，无需品牌锁）
    pub async fn record_sync_error(
        &self,
        tenant_id: &str,
        brand_id: &str,
        at: DateTime<Utc>,
        message: &str,
    ) -> Result<()> {
        let summary: String = message.chars().take(MAX_ERROR_LEN).collect();
        let db = &self.db;
        retry::with_retry("record_sync_error", self.retry_config(), || {
            let summary = summary.clone();
            async move {
                brand_ga4_settings::Entity::update_many()
                    .col_expr(brand_ga4_settings::Column::LastErrorAt, Expr::value(Some(at)))
                    .col_expr(brand_ga4_settings::Column::LastError, Expr::value(Some(summary)))
                    .col_expr(brand_ga4_settings::Column::UpdatedAt, Expr::value(at))
                    .filter(brand_ga4_settings::Column::TenantId.eq(tenant_id))
                    .filter(brand_ga4_settings::Column::BrandId.eq(brand_id))
                    .exec(db)
                    .await
            }
        })
        .await?;
        Ok(())
    }
}
