//! 事实表迁移
//!
//! - marketing_fact_daily: 每日指标事实（按 tenant/brand/platform/account/campaign/date）
//! - fact_sync_coverage: 已完整物化的封闭区间台账

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MarketingFactDaily::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MarketingFactDaily::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::TenantId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::BrandId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MarketingFactDaily::Date).date().not_null())
                    .col(
                        ColumnDef::new(MarketingFactDaily::Platform)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::AccountId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::CampaignId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::Currency)
                            .string_len(8)
                            .not_null()
                            .default("USD"),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::Impressions)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::Clicks)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::Spend)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::Conversions)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::Revenue)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::Sessions)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::Leads)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MarketingFactDaily::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 查询主路径：tenant + brand + platform + account + date
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_fact_daily_scope_date")
                    .table(MarketingFactDaily::Table)
                    .col(MarketingFactDaily::TenantId)
                    .col(MarketingFactDaily::BrandId)
                    .col(MarketingFactDaily::Platform)
                    .col(MarketingFactDaily::AccountId)
                    .col(MarketingFactDaily::Date)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_fact_daily_brand_date")
                    .table(MarketingFactDaily::Table)
                    .col(MarketingFactDaily::TenantId)
                    .col(MarketingFactDaily::BrandId)
                    .col(MarketingFactDaily::Date)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FactSyncCoverage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FactSyncCoverage::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FactSyncCoverage::TenantId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FactSyncCoverage::BrandId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FactSyncCoverage::Platform)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FactSyncCoverage::AccountId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FactSyncCoverage::Scope)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(FactSyncCoverage::StartDate).date().not_null())
                    .col(ColumnDef::new(FactSyncCoverage::EndDate).date().not_null())
                    .col(
                        ColumnDef::new(FactSyncCoverage::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_fact_coverage_scope")
                    .table(FactSyncCoverage::Table)
                    .col(FactSyncCoverage::TenantId)
                    .col(FactSyncCoverage::BrandId)
                    .col(FactSyncCoverage::Platform)
                    .col(FactSyncCoverage::AccountId)
                    .col(FactSyncCoverage::Scope)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_fact_coverage_scope").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FactSyncCoverage::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_fact_daily_brand_date").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_fact_daily_scope_date").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MarketingFactDaily::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum MarketingFactDaily {
    #[sea_orm(iden = "marketing_fact_daily")]
    Table,
    Id,
    TenantId,
    BrandId,
    Date,
    Platform,
    AccountId,
    CampaignId,
    Currency,
    Impressions,
    Clicks,
    Spend,
    Conversions,
    Revenue,
    Sessions,
    Leads,
    SyncedAt,
}

#[derive(DeriveIden)]
enum FactSyncCoverage {
    #[sea_orm(iden = "fact_sync_coverage")]
    Table,
    Id,
    TenantId,
    BrandId,
    Platform,
    AccountId,
    Scope,
    StartDate,
    EndDate,
    SyncedAt,
}
