//! 品牌平台绑定与 GA4 设置表迁移

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BrandPlatformBinding::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BrandPlatformBinding::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BrandPlatformBinding::TenantId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandPlatformBinding::BrandId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandPlatformBinding::Platform)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandPlatformBinding::AccountId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandPlatformBinding::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandPlatformBinding::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(BrandPlatformBinding::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandPlatformBinding::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 同一账号在同一品牌平台下只保留一行，状态切换复用该行
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_binding_account_unique")
                    .table(BrandPlatformBinding::Table)
                    .col(BrandPlatformBinding::TenantId)
                    .col(BrandPlatformBinding::BrandId)
                    .col(BrandPlatformBinding::Platform)
                    .col(BrandPlatformBinding::AccountId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_binding_status")
                    .table(BrandPlatformBinding::Table)
                    .col(BrandPlatformBinding::TenantId)
                    .col(BrandPlatformBinding::BrandId)
                    .col(BrandPlatformBinding::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BrandGa4Settings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BrandGa4Settings::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::TenantId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::BrandId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::PropertyId)
                            .string_len(128)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::BindingVersion)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::Timezone)
                            .string_len(64)
                            .not_null()
                            .default("UTC"),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::LeadEventNames)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::ConversionEventNames)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::LastErrorAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(BrandGa4Settings::LastError).text().null())
                    .col(
                        ColumnDef::new(BrandGa4Settings::BackfillCursor)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandGa4Settings::UpdatedAt)
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
                    .name("idx_ga4_settings_brand_unique")
                    .table(BrandGa4Settings::Table)
                    .col(BrandGa4Settings::TenantId)
                    .col(BrandGa4Settings::BrandId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_ga4_settings_brand_unique")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(BrandGa4Settings::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_binding_status").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_binding_account_unique").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BrandPlatformBinding::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum BrandPlatformBinding {
    #[sea_orm(iden = "brand_platform_binding")]
    Table,
    Id,
    TenantId,
    BrandId,
    Platform,
    AccountId,
    Status,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum BrandGa4Settings {
    #[sea_orm(iden = "brand_ga4_settings")]
    Table,
    Id,
    TenantId,
    BrandId,
    PropertyId,
    BindingVersion,
    Timezone,
    LeadEventNames,
    ConversionEventNames,
    LastSyncAt,
    LastErrorAt,
    LastError,
    BackfillCursor,
    CreatedAt,
    UpdatedAt,
}
