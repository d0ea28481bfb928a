//! 品牌与外部平台账号的绑定实体

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "brand_platform_binding")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub tenant_id: String,
    pub brand_id: String,
    pub platform: String,
    pub account_id: String,
    /// ACTIVE / DISCONNECTED
    pub status: String,
    /// 每次状态变化递增，用于乐观并发校验
    pub version: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
