//! 每日营销事实表实体
//!
//! `campaign_id = NULL` 的行属于聚合分区，非空的行属于活动分区，两者永远不会在同一查询中相加。

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "marketing_fact_daily")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub tenant_id: String,
    pub brand_id: String,
    pub date: Date,
    pub platform: String,
    pub account_id: String,
    pub campaign_id: Option<String>,
    pub currency: String,
    pub impressions: i64,
    pub clicks: i64,
    #[sea_orm(column_type = "Double")]
    pub spend: f64,
    #[sea_orm(column_type = "Double")]
    pub conversions: f64,
    #[sea_orm(column_type = "Double")]
    pub revenue: f64,
    pub sessions: i64,
    #[sea_orm(column_type = "Double")]
    pub leads: f64,
    pub synced_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
