//! 品牌级 GA4 规范设置实体

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "brand_ga4_settings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub tenant_id: String,
    pub brand_id: String,
    pub property_id: Option<String>,
    pub binding_version: i64,
    pub timezone: String,
    /// JSON 数组
    #[sea_orm(column_type = "Text")]
    pub lead_event_names: String,
    /// JSON 数组
    #[sea_orm(column_type = "Text")]
    pub conversion_event_names: String,
    pub last_sync_at: Option<DateTimeUtc>,
    pub last_error_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub backfill_cursor: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
