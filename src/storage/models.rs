use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::utils::DateRange;

/// 外部广告/分析平台
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Ga4,
    Meta,
    GoogleAds,
    Tiktok,
    Linkedin,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ga4 => "ga4",
            Platform::Meta => "meta",
            Platform::GoogleAds => "google_ads",
            Platform::Tiktok => "tiktok",
            Platform::Linkedin => "linkedin",
        }
    }

    /// 该平台的事实行是否由本模块物化（其余平台由各自的导入流程写入）
    pub fn is_materialized(&self) -> bool {
        matches!(self, Platform::Ga4)
    }
}

/// 事实分区：`campaign_id IS NULL` 为聚合分区，非空为活动分区
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FactScope {
    Aggregated,
    Campaign,
}

impl FactScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactScope::Aggregated => "aggregated",
            FactScope::Campaign => "campaign",
        }
    }
}

/// 绑定状态，数据库中以大写字符串存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
pub enum BindingStatus {
    #[strum(serialize = "ACTIVE")]
    Active,
    #[strum(serialize = "DISCONNECTED")]
    Disconnected,
}

/// 当前权威账号及其绑定版本（乐观并发校验用）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveAccount {
    pub account_id: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingRecord {
    pub id: i64,
    pub tenant_id: String,
    pub brand_id: String,
    pub platform: Platform,
    pub account_id: String,
    pub status: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BindingRecord {
    pub fn is_active(&self) -> bool {
        self.status == BindingStatus::Active.as_ref()
    }
}

/// 一次替换写入覆盖的精确键：(tenant, brand, platform, account, scope, range)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactKey {
    pub tenant_id: String,
    pub brand_id: String,
    pub platform: Platform,
    pub account_id: String,
    pub scope: FactScope,
    pub range: DateRange,
}

/// 待写入的单日事实
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactInput {
    pub date: NaiveDate,
    pub campaign_id: Option<String>,
    pub currency: String,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub conversions: f64,
    pub revenue: f64,
    pub sessions: i64,
    pub leads: f64,
}

/// 替换写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(usize),
    /// 锁内复核发现权威账号已变化，写入被放弃
    Superseded,
}

/// 品牌级 GA4 规范设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ga4Settings {
    pub tenant_id: String,
    pub brand_id: String,
    pub property_id: Option<String>,
    pub binding_version: i64,
    pub timezone: String,
    pub lead_event_names: Vec<String>,
    pub conversion_event_names: Vec<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub backfill_cursor: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// GA4 设置的局部更新
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ga4SettingsPatch {
    pub timezone: Option<String>,
    pub lead_event_names: Option<Vec<String>>,
    pub conversion_event_names: Option<Vec<String>>,
}

/// 懒创建设置时使用的默认值
#[derive(Debug, Clone)]
pub struct Ga4Defaults {
    pub timezone: String,
    pub lead_event_names: Vec<String>,
    pub conversion_event_names: Vec<String>,
}

impl Default for Ga4Defaults {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            lead_event_names: vec!["generate_lead".to_string()],
            conversion_event_names: Vec::new(),
        }
    }
}

impl Ga4Defaults {
    pub fn from_config(config: &crate::config::SyncConfig) -> Self {
        Self {
            timezone: config.default_timezone.clone(),
            lead_event_names: config.lead_event_names.clone(),
            conversion_event_names: config.conversion_event_names.clone(),
        }
    }
}
