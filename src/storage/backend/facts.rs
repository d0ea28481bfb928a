//! 事实表与覆盖台账
//!
//! 事实行只按精确键整段删除再插入，从不原地更新。

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use tracing::debug;

use migration::entities::{fact_sync_coverage, marketing_fact_daily};

use super::SeaOrmStorage;
use super::retry;
use crate::errors::{ReportingError, Result};
use crate::storage::models::{FactInput, FactKey, FactScope, Platform};
use crate::utils::DateRange;

fn scope_condition(scope: FactScope) -> Condition {
    match scope {
        FactScope::Aggregated => {
            Condition::all().add(marketing_fact_daily::Column::CampaignId.is_null())
        }
        FactScope::Campaign => {
            Condition::all().add(marketing_fact_daily::Column::CampaignId.is_not_null())
        }
    }
}

fn key_condition(key: &FactKey) -> Condition {
    Condition::all()
        .add(marketing_fact_daily::Column::TenantId.eq(key.tenant_id.as_str()))
        .add(marketing_fact_daily::Column::BrandId.eq(key.brand_id.as_str()))
        .add(marketing_fact_daily::Column::Platform.eq(key.platform.as_str()))
        .add(marketing_fact_daily::Column::AccountId.eq(key.account_id.as_str()))
        .add(marketing_fact_daily::Column::Date.gte(key.range.start))
        .add(marketing_fact_daily::Column::Date.lte(key.range.end))
        .add(scope_condition(key.scope))
}

/// 行必须落在键的日期区间和分区内
fn check_rows(key: &FactKey, rows: &[FactInput]) -> Result<()> {
    for row in rows {
        if !key.range.contains(row.date) {
            return Err(ReportingError::internal(format!(
                "Fact row dated {} is outside write range {}",
                row.date, key.range
            )));
        }
        let campaign_row = row.campaign_id.is_some();
        if campaign_row != (key.scope == FactScope::Campaign) {
            return Err(ReportingError::internal(format!(
                "Fact row on {} does not belong to the {} partition",
                row.date,
                key.scope.as_str()
            )));
        }
    }
    Ok(())
}

/// 删除精确键范围内的事实行
pub(crate) async fn delete_facts_in<C: ConnectionTrait>(conn: &C, key: &FactKey) -> Result<u64> {
    let result = marketing_fact_daily::Entity::delete_many()
        .filter(key_condition(key))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// 分批插入事实行
pub(crate) async fn insert_facts_in<C: ConnectionTrait>(
    conn: &C,
    key: &FactKey,
    rows: &[FactInput],
    batch_size: usize,
    now: DateTime<Utc>,
) -> Result<usize> {
    check_rows(key, rows)?;

    for chunk in rows.chunks(batch_size.max(1)) {
        let models = chunk.iter().map(|row| marketing_fact_daily::ActiveModel {
            tenant_id: Set(key.tenant_id.clone()),
            brand_id: Set(key.brand_id.clone()),
            date: Set(row.date),
            platform: Set(key.platform.as_str().to_string()),
            account_id: Set(key.account_id.clone()),
            campaign_id: Set(row.campaign_id.clone()),
            currency: Set(row.currency.clone()),
            impressions: Set(row.impressions),
            clicks: Set(row.clicks),
            spend: Set(row.spend),
            conversions: Set(row.conversions),
            revenue: Set(row.revenue),
            sessions: Set(row.sessions),
            leads: Set(row.leads),
            synced_at: Set(now),
            ..Default::default()
        });
        marketing_fact_daily::Entity::insert_many(models)
            .exec(conn)
            .await?;
    }
    Ok(rows.len())
}

/// 删除该平台下不属于 `keep_account` 的事实行与覆盖记录（None 表示全部删除）
pub(crate) async fn purge_other_accounts_in<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    brand_id: &str,
    platform: Platform,
    keep_account: Option<&str>,
) -> Result<u64> {
    let mut facts = Condition::all()
        .add(marketing_fact_daily::Column::TenantId.eq(tenant_id))
        .add(marketing_fact_daily::Column::BrandId.eq(brand_id))
        .add(marketing_fact_daily::Column::Platform.eq(platform.as_str()));
    let mut coverage = Condition::all()
        .add(fact_sync_coverage::Column::TenantId.eq(tenant_id))
        .add(fact_sync_coverage::Column::BrandId.eq(brand_id))
        .add(fact_sync_coverage::Column::Platform.eq(platform.as_str()));
    if let Some(account) = keep_account {
        facts = facts.add(marketing_fact_daily::Column::AccountId.ne(account));
        coverage = coverage.add(fact_sync_coverage::Column::AccountId.ne(account));
    }

    let removed = marketing_fact_daily::Entity::delete_many()
        .filter(facts)
        .exec(conn)
        .await?
        .rows_affected;
    fact_sync_coverage::Entity::delete_many()
        .filter(coverage)
        .exec(conn)
        .await?;
    Ok(removed)
}

/// 记录已完整物化的封闭区间，并合并被其包含的旧记录
pub(crate) async fn record_coverage_in<C: ConnectionTrait>(
    conn: &C,
    key: &FactKey,
    covered: DateRange,
    now: DateTime<Utc>,
) -> Result<()> {
    let same_scope = Condition::all()
        .add(fact_sync_coverage::Column::TenantId.eq(key.tenant_id.as_str()))
        .add(fact_sync_coverage::Column::BrandId.eq(key.brand_id.as_str()))
        .add(fact_sync_coverage::Column::Platform.eq(key.platform.as_str()))
        .add(fact_sync_coverage::Column::AccountId.eq(key.account_id.as_str()))
        .add(fact_sync_coverage::Column::Scope.eq(key.scope.as_str()));

    fact_sync_coverage::Entity::delete_many()
        .filter(same_scope)
        .filter(fact_sync_coverage::Column::StartDate.gte(covered.start))
        .filter(fact_sync_coverage::Column::EndDate.lte(covered.end))
        .exec(conn)
        .await?;

    fact_sync_coverage::Entity::insert(fact_sync_coverage::ActiveModel {
        tenant_id: Set(key.tenant_id.clone()),
        brand_id: Set(key.brand_id.clone()),
        platform: Set(key.platform.as_str().to_string()),
        account_id: Set(key.account_id.clone()),
        scope: Set(key.scope.as_str().to_string()),
        start_date: Set(covered.start),
        end_date: Set(covered.end),
        synced_at: Set(now),
        ..Default::default()
    })
    .exec(conn)
    .await?;
    Ok(())
}

impl SeaOrmStorage {
    /// 覆盖台账中是否有一条记录完整包含 `key.range`
    pub async fn is_range_covered(&self, key: &FactKey) -> Result<bool> {
        let db = &self.db;
        let count = retry::with_retry("is_range_covered", self.retry_config(), || async {
            fact_sync_coverage::Entity::find()
                .filter(fact_sync_coverage::Column::TenantId.eq(key.tenant_id.as_str()))
                .filter(fact_sync_coverage::Column::BrandId.eq(key.brand_id.as_str()))
                .filter(fact_sync_coverage::Column::Platform.eq(key.platform.as_str()))
                .filter(fact_sync_coverage::Column::AccountId.eq(key.account_id.as_str()))
                .filter(fact_sync_coverage::Column::Scope.eq(key.scope.as_str()))
                .filter(fact_sync_coverage::Column::StartDate.lte(key.range.start))
                .filter(fact_sync_coverage::Column::EndDate.gte(key.range.end))
                .count(db)
                .await
        })
        .await?;
        Ok(count > 0)
    }

    /// 外部导入入口：在品牌锁内整段替换事实行
    pub async fn replace_facts(
        &self,
        key: &FactKey,
        rows: Vec<FactInput>,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        check_rows(key, &rows)?;
        let key_owned = key.clone();
        let written = self
            .with_brand_lock(&key.tenant_id, &key.brand_id, move |txn| {
                Box::pin(async move {
                    let removed = delete_facts_in(txn, &key_owned).await?;
                    let written = insert_facts_in(txn, &key_owned, &rows, batch_size, now).await?;
                    debug!(removed, written, "Facts replaced for {}", key_owned.range);
                    Ok(written)
                })
            })
            .await?;
        Ok(written)
    }

    /// 某平台的事实行数（可限定账号）
    pub async fn count_facts(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
        account_id: Option<&str>,
    ) -> Result<u64> {
        let mut query = marketing_fact_daily::Entity::find()
            .filter(marketing_fact_daily::Column::TenantId.eq(tenant_id))
            .filter(marketing_fact_daily::Column::BrandId.eq(brand_id))
            .filter(marketing_fact_daily::Column::Platform.eq(platform.as_str()));
        if let Some(account) = account_id {
            query = query.filter(marketing_fact_daily::Column::AccountId.eq(account));
        }
        Ok(query.count(&self.db).await?)
    }

    /// 某平台事实行中出现的账号
    pub async fn fact_accounts(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
    ) -> Result<Vec<String>> {
        let accounts = marketing_fact_daily::Entity::find()
            .select_only()
            .column(marketing_fact_daily::Column::AccountId)
            .distinct()
            .filter(marketing_fact_daily::Column::TenantId.eq(tenant_id))
            .filter(marketing_fact_daily::Column::BrandId.eq(brand_id))
            .filter(marketing_fact_daily::Column::Platform.eq(platform.as_str()))
            .order_by_asc(marketing_fact_daily::Column::AccountId)
            .into_tuple::<String>()
            .all(&self.db)
            .await?;
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key(scope: FactScope) -> FactKey {
        FactKey {
            tenant_id: "t".to_string(),
            brand_id: "b".to_string(),
            platform: Platform::Ga4,
            account_id: "properties/1".to_string(),
            scope,
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
            )
            .unwrap(),
        }
    }

    fn row(day: u32, campaign: Option<&str>) -> FactInput {
        FactInput {
            date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            campaign_id: campaign.map(str::to_string),
            currency: "USD".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_check_rows_enforces_partition() {
        assert!(check_rows(&key(FactScope::Aggregated), &[row(2, None)]).is_ok());
        assert!(check_rows(&key(FactScope::Aggregated), &[row(2, Some("c1"))]).is_err());
        assert!(check_rows(&key(FactScope::Campaign), &[row(2, None)]).is_err());
        assert!(check_rows(&key(FactScope::Campaign), &[row(3, Some("c1"))]).is_ok());
    }

    #[test]
    fn test_check_rows_enforces_range() {
        assert!(check_rows(&key(FactScope::Aggregated), &[row(8, None)]).is_err());
    }
}
