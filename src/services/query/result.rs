//! Query result shapes and assembly from aggregate output

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::MetricCatalogEntry;
use super::request::{CompareMode, Dimension};
use crate::storage::backend::{AggregateOutput, BaseColumn};
use crate::storage::models::Platform;
use crate::utils::DateRange;

/// Freshness of one platform's facts for this response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Materialized during this request
    Fresh,
    /// Closed range already complete
    Skipped,
    /// Materialization failed or timed out; serving what is stored
    Stale,
    NoAccount,
    /// Active account switched mid-sync
    Superseded,
    /// Facts come from another ingestion
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMeta {
    pub brand_id: String,
    pub timezone: String,
    pub range: DateRange,
    pub compare_range: Option<DateRange>,
    pub compare_to: Option<CompareMode>,
    pub platforms: Vec<Platform>,
    pub sync: BTreeMap<Platform, SyncStatus>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub dimensions: BTreeMap<String, Option<String>>,
    /// `None` for a derived metric whose denominator is zero
    pub metrics: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub limit: u64,
    pub offset: u64,
    pub returned: u64,
    pub total_rows: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareBlock {
    pub range: DateRange,
    pub rows: Vec<ResultRow>,
    pub totals: BTreeMap<String, Option<f64>>,
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub meta: QueryMeta,
    pub rows: Vec<ResultRow>,
    pub totals: BTreeMap<String, Option<f64>>,
    pub page_info: PageInfo,
    pub compare: Option<CompareBlock>,
}

/// Rows, totals and page info built from one aggregate execution
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub rows: Vec<ResultRow>,
    pub totals: BTreeMap<String, Option<f64>>,
    pub page_info: PageInfo,
}

fn metric_values(
    entries: &[&'static MetricCatalogEntry],
    bases: &[BaseColumn],
    sums: &[f64],
) -> BTreeMap<String, Option<f64>> {
    let by_column: BTreeMap<BaseColumn, f64> =
        bases.iter().copied().zip(sums.iter().copied()).collect();
    entries
        .iter()
        .map(|entry| (entry.key.to_string(), entry.value(&by_column)))
        .collect()
}

pub fn build_section(
    output: &AggregateOutput,
    dimensions: &[Dimension],
    entries: &[&'static MetricCatalogEntry],
    bases: &[BaseColumn],
    limit: u64,
    offset: u64,
) -> Section {
    let rows: Vec<ResultRow> = output
        .rows
        .iter()
        .map(|row| ResultRow {
            dimensions: dimensions
                .iter()
                .zip(row.dimensions.iter())
                .map(|(dim, value)| (dim.as_ref().to_string(), value.clone()))
                .collect(),
            metrics: metric_values(entries, bases, &row.sums),
        })
        .collect();
    let returned = rows.len() as u64;
    Section {
        rows,
        totals: metric_values(entries, bases, &output.totals),
        page_info: PageInfo {
            limit,
            offset,
            returned,
            total_rows: output.total_rows,
            has_more: offset + returned < output.total_rows,
        },
    }
}
