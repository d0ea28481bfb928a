//! Query payload as sent by callers

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::storage::backend::DimensionColumn;
use crate::storage::models::Platform;
use crate::utils::RangePreset;

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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Dimension {
    Date,
    Platform,
    Account,
    Campaign,
}

impl Dimension {
    pub fn column(&self) -> DimensionColumn {
        match self {
            Dimension::Date => DimensionColumn::Date,
            Dimension::Platform => DimensionColumn::Platform,
            Dimension::Account => DimensionColumn::Account,
            Dimension::Campaign => DimensionColumn::Campaign,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    In,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

impl FilterValue {
    pub fn values(&self) -> Vec<String> {
        match self {
            FilterValue::One(v) => vec![v.clone()],
            FilterValue::Many(vs) => vs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterInput {
    pub field: Dimension,
    pub op: FilterOp,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    PreviousPeriod,
    PreviousYear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortInput {
    /// A requested dimension or metric key
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRangeInput {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// `queryMetrics` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub brand_id: String,
    /// Explicit calendar range; mutually exclusive with `preset`
    #[serde(default)]
    pub date_range: Option<DateRangeInput>,
    /// Named rolling range expanded in the brand timezone
    #[serde(default)]
    pub preset: Option<RangePreset>,
    /// Platforms that must be connected
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterInput>,
    #[serde(default)]
    pub compare_to: Option<CompareMode>,
    #[serde(default)]
    pub sort: Option<SortInput>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}
