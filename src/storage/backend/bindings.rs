//! 品牌与平台账号绑定的读写
//!
//! 写操作只暴露为事务内函数，调用方须持有品牌锁。

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, ExprTrait,
    QueryFilter, QueryOrder, QuerySelect,
};

use migration::entities::brand_platform_binding;

use super::SeaOrmStorage;
use super::retry;
use crate::errors::{ReportingError, Result};
use crate::storage::models::{BindingRecord, BindingStatus, Platform};

fn to_record(model: brand_platform_binding::Model) -> Result<BindingRecord> {
    let platform = Platform::from_str(&model.platform).map_err(|_| {
        ReportingError::internal(format!(
            "Unknown platform '{}' on binding {}",
            model.platform, model.id
        ))
    })?;
    Ok(BindingRecord {
        id: model.id,
        tenant_id: model.tenant_id,
        brand_id: model.brand_id,
        platform,
        account_id: model.account_id,
        status: model.status,
        version: model.version,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

/// ACTIVE 绑定，最近更新的在前
pub(crate) async fn active_bindings_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
    platform: Platform,
) -> Result<Vec<BindingRecord>> {
    let models = brand_platform_binding::Entity::find()
        .filter(brand_platform_binding::Column::TenantId.eq(tenant_id))
        .filter(brand_platform_binding::Column::BrandId.eq(brand_id))
        .filter(brand_platform_binding::Column::Platform.eq(platform.as_str()))
        .filter(brand_platform_binding::Column::Status.eq(BindingStatus::Active.as_ref()))
        .order_by_desc(brand_platform_binding::Column::UpdatedAt)
        .order_by_desc(brand_platform_binding::Column::Version)
        .order_by_desc(brand_platform_binding::Column::Id)
        .all(conn)
        .await?;
    models.into_iter().map(to_record).collect()
}

/// 将除 `keep_id` 外的 ACTIVE 绑定降级为 DISCONNECTED，返回降级数量
pub(crate) async fn demote_active_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
    platform: Platform,
    keep_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut update = brand_platform_binding::Entity::update_many()
        .col_expr(
            brand_platform_binding::Column::Status,
            Expr::value(BindingStatus::Disconnected.as_ref()),
        )
        .col_expr(
            brand_platform_binding::Column::Version,
            Expr::col(brand_platform_binding::Column::Version).add(1),
        )
        .col_expr(brand_platform_binding::Column::UpdatedAt, Expr::value(now))
        .filter(brand_platform_binding::Column::TenantId.eq(tenant_id))
        .filter(brand_platform_binding::Column::BrandId.eq(brand_id))
        .filter(brand_platform_binding::Column::Platform.eq(platform.as_str()))
        .filter(brand_platform_binding::Column::Status.eq(BindingStatus::Active.as_ref()));
    if let Some(id) = keep_id {
        update = update.filter(brand_platform_binding::Column::Id.ne(id));
    }
    let result = update.exec(conn).await?;
    Ok(result.rows_affected)
}

/// 激活 (tenant, brand, platform, account) 绑定，版本号取该元组的最大版本 + 1
pub(crate) async fn activate_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
    platform: Platform,
    account_id: &str,
    now: DateTime<Utc>,
) -> Result<BindingRecord> {
    let max_version: Option<Option<i64>> = brand_platform_binding::Entity::find()
        .select_only()
        .column_as(brand_platform_binding::Column::Version.max(), "max_version")
        .filter(brand_platform_binding::Column::TenantId.eq(tenant_id))
        .filter(brand_platform_binding::Column::BrandId.eq(brand_id))
        .filter(brand_platform_binding::Column::Platform.eq(platform.as_str()))
        .into_tuple::<Option<i64>>()
        .one(conn)
        .await?;
    let next_version = max_version.flatten().unwrap_or(0) + 1;

    let existing = brand_platform_binding::Entity::find()
        .filter(brand_platform_binding::Column::TenantId.eq(tenant_id))
        .filter(brand_platform_binding::Column::BrandId.eq(brand_id))
        .filter(brand_platform_binding::Column::Platform.eq(platform.as_str()))
        .filter(brand_platform_binding::Column::AccountId.eq(account_id))
        .one(conn)
        .await?;

    let model = match existing {
        Some(model) => {
            let mut active: brand_platform_binding::ActiveModel = model.into();
            active.status = Set(BindingStatus::Active.as_ref().to_string());
            active.version = Set(next_version);
            active.updated_at = Set(now);
            active.update(conn).await?
        }
        None => {
            brand_platform_binding::ActiveModel {
                tenant_id: Set(tenant_id.to_string()),
                brand_id: Set(brand_id.to_string()),
                platform: Set(platform.as_str().to_string()),
                account_id: Set(account_id.to_string()),
                status: Set(BindingStatus::Active.as_ref().to_string()),
                version: Set(next_version),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await?
        }
    };
    to_record(model)
}

/// 仅刷新时间戳（幂等激活）
pub(crate) async fn touch_in<C: ConnectionTrait>(
    conn: &C,
    binding_id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    brand_platform_binding::Entity::update_many()
        .col_expr(brand_platform_binding::Column::UpdatedAt, Expr::value(now))
        .filter(brand_platform_binding::Column::Id.eq(binding_id))
        .exec(conn)
        .await?;
    Ok(())
}

impl SeaOrmStorage {
    /// 品牌的 ACTIVE 绑定（无锁读取）
    pub async fn active_bindings(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
    ) -> Result<Vec<BindingRecord>> {
        active_bindings_in(&self.db, tenant_id, brand_id, platform).await
    }

    /// 品牌所有绑定（含 DISCONNECTED），按平台、版本排序
    pub async fn list_bindings(
        &self,
        tenant_id: &str,
        brand_id: &str,
    ) -> Result<Vec<BindingRecord>> {
        let models = brand_platform_binding::Entity::find()
            .filter(brand_platform_binding::Column::TenantId.eq(tenant_id))
            .filter(brand_platform_binding::Column::BrandId.eq(brand_id))
            .order_by_asc(brand_platform_binding::Column::Platform)
            .order_by_desc(brand_platform_binding::Column::Version)
            .all(&self.db)
            .await?;
        models.into_iter().map(to_record).collect()
    }

    /// 至少有一个 ACTIVE 绑定的平台集合
    pub async fn active_platforms(
        &self,
        tenant_id: &str,
        brand_id: &str,
    ) -> Result<BTreeSet<Platform>> {
        let db = &self.db;
        let names: Vec<String> = retry::with_retry("active_platforms", self.retry_config(), || async {
            brand_platform_binding::Entity::find()
                .select_only()
                .column(brand_platform_binding::Column::Platform)
                .distinct()
                .filter(brand_platform_binding::Column::TenantId.eq(tenant_id))
                .filter(brand_platform_binding::Column::BrandId.eq(brand_id))
                .filter(
                    brand_platform_binding::Column::Status.eq(BindingStatus::Active.as_ref()),
                )
                .into_tuple::<String>()
                .all(db)
                .await
        })
        .await?;
        Ok(names
            .iter()
            .filter_map(|name| Platform::from_str(name).ok())
            .collect())
    }

    /// 租户下出现过绑定的品牌
    pub async fn list_bound_brands(&self, tenant_id: &str) -> Result<Vec<String>> {
        let brands = brand_platform_binding::Entity::find()
            .select_only()
            .column(brand_platform_binding::Column::BrandId)
            .distinct()
            .filter(brand_platform_binding::Column::TenantId.eq(tenant_id))
            .order_by_asc(brand_platform_binding::Column::BrandId)
            .into_tuple::<String>()
            .all(&self.db)
            .await?;
        Ok(brands)
    }
}
