//! Upstream report rows → daily fact rows

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use super::ga4_schema::{DATE_DIMENSION, DATE_FORMAT, FieldPlan, METRIC_MAPPINGS};
use crate::errors::{ReportingError, Result};
use crate::services::collaborators::{ReportResponse, ReportRow};
use crate::storage::backend::BaseColumn;
use crate::storage::models::FactInput;
use crate::utils::DateRange;

pub const DEFAULT_CURRENCY: &str = "USD";
/// GA4 placeholder for rows without a campaign
pub const NOT_SET: &str = "(not set)";

/// Facts keyed by (date, campaign)
pub type FactMap = BTreeMap<(NaiveDate, Option<String>), FactInput>;

struct Columns {
    date: usize,
    campaign: Option<usize>,
}

fn locate_columns(response: &ReportResponse, plan: &FieldPlan) -> Result<Columns> {
    let find = |name: &str| response.dimension_headers.iter().position(|h| h == name);
    let date = find(DATE_DIMENSION).ok_or_else(|| {
        ReportingError::upstream("Report is missing the date dimension column")
    })?;
    let campaign = match plan.campaign_dimension() {
        Some(name) => Some(find(name).ok_or_else(|| {
            ReportingError::upstream(format!("Report is missing the '{}' dimension column", name))
        })?),
        None => None,
    };
    Ok(Columns { date, campaign })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

fn parse_number(raw: &str) -> f64 {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn add_metric(row: &mut FactInput, column: BaseColumn, value: f64) {
    match column {
        BaseColumn::Impressions => row.impressions += value.round() as i64,
        BaseColumn::Clicks => row.clicks += value.round() as i64,
        BaseColumn::Sessions => row.sessions += value.round() as i64,
        BaseColumn::Spend => row.spend += value,
        BaseColumn::Conversions => row.conversions += value,
        BaseColumn::Revenue => row.revenue += value,
        BaseColumn::Leads => row.leads += value,
    }
}

/// Row key, or `None` when the row is unusable for this range
fn row_key(
    row: &ReportRow,
    columns: &Columns,
    range: &DateRange,
) -> Option<(NaiveDate, Option<String>)> {
    let raw_date = row.dimension_values.get(columns.date)?;
    let Some(date) = parse_date(raw_date) else {
        debug!(raw = %raw_date, "Skipping report row with unparseable date");
        return None;
    };
    if !range.contains(date) {
        return None;
    }
    let campaign = match columns.campaign {
        Some(idx) => {
            let value = row.dimension_values.get(idx).map(|v| v.trim()).unwrap_or("");
            Some(if value.is_empty() { NOT_SET } else { value }.to_string())
        }
        None => None,
    };
    Some((date, campaign))
}

fn blank_row(date: NaiveDate, campaign: Option<String>, currency: &str) -> FactInput {
    FactInput {
        date,
        campaign_id: campaign,
        currency: currency.to_string(),
        ..Default::default()
    }
}

/// Build fact rows from the base metric report
pub fn base_facts(response: &ReportResponse, plan: &FieldPlan, range: &DateRange) -> Result<FactMap> {
    let columns = locate_columns(response, plan)?;
    let currency = response.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);

    let metric_columns: Vec<(BaseColumn, usize)> = METRIC_MAPPINGS
        .iter()
        .filter_map(|m| {
            let name = plan.metric_name(m.column)?;
            let idx = response.metric_headers.iter().position(|h| h == name)?;
            Some((m.column, idx))
        })
        .collect();

    let mut facts = FactMap::new();
    for row in &response.rows {
        let Some(key) = row_key(row, &columns, range) else {
            continue;
        };
        let fact = facts
            .entry(key.clone())
            .or_insert_with(|| blank_row(key.0, key.1, currency));
        for (column, idx) in &metric_columns {
            let value = row.metric_values.get(*idx).map(|v| parse_number(v)).unwrap_or(0.0);
            add_metric(fact, *column, value);
        }
    }
    Ok(facts)
}

/// Merge a filtered `eventCount` report into `target` (leads or conversions)
///
/// The event totals replace whatever the base report put into `target`.
pub fn merge_event_counts(
    facts: &mut FactMap,
    response: &ReportResponse,
    plan: &FieldPlan,
    range: &DateRange,
    target: BaseColumn,
) -> Result<()> {
    let columns = locate_columns(response, plan)?;
    let currency = response.currency.as_deref().unwrap_or(DEFAULT_CURRENCY).to_string();
    let Some(metric_idx) = plan
        .metric_name(BaseColumn::Leads)
        .and_then(|name| response.metric_headers.iter().position(|h| h == name))
    else {
        return Err(ReportingError::upstream("Event report is missing the eventCount column"));
    };

    let mut counts: FactMap = FactMap::new();
    for row in &response.rows {
        let Some(key) = row_key(row, &columns, range) else {
            continue;
        };
        let value = row.metric_values.get(metric_idx).map(|v| parse_number(v)).unwrap_or(0.0);
        let entry = counts
            .entry(key.clone())
            .or_insert_with(|| blank_row(key.0, key.1, &currency));
        add_metric(entry, target, value);
    }

    for fact in facts.values_mut() {
        match target {
            BaseColumn::Conversions => fact.conversions = 0.0,
            _ => fact.leads = 0.0,
        }
    }
    for (key, count) in counts {
        let value = match target {
            BaseColumn::Conversions => count.conversions,
            _ => count.leads,
        };
        let fact = facts
            .entry(key.clone())
            .or_insert_with(|| blank_row(key.0, key.1, &currency));
        add_metric(fact, target, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::materializer::ga4_schema::CAMPAIGN_DIMENSION;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
        )
        .unwrap()
    }

    fn row(dims: &[&str], metrics: &[&str]) -> ReportRow {
        ReportRow {
            dimension_values: dims.iter().map(|s| s.to_string()).collect(),
            metric_values: metrics.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_base_facts_maps_headers_and_filters_range() {
        let plan = FieldPlan::base(false);
        let response = ReportResponse {
            dimension_headers: vec!["date".to_string()],
            metric_headers: vec![
                "advertiserAdClicks".to_string(),
                "advertiserAdImpressions".to_string(),
                "advertiserAdCost".to_string(),
            ],
            rows: vec![
                row(&["20260101"], &["20", "200", "10.0"]),
                row(&["20260105"], &["1", "1", "1"]),
                row(&["garbage"], &["1", "1", "1"]),
            ],
            currency: Some("EUR".to_string()),
        };
        let facts = base_facts(&response, &plan, &range()).unwrap();
        assert_eq!(facts.len(), 1);
        let fact = facts.values().next().unwrap();
        assert_eq!(fact.clicks, 20);
        assert_eq!(fact.impressions, 200);
        assert_eq!(fact.spend, 10.0);
        assert_eq!(fact.sessions, 0);
        assert_eq!(fact.currency, "EUR");
        assert!(fact.campaign_id.is_none());
    }

    #[test]
    fn test_campaign_rows_never_have_null_campaign() {
        let plan = FieldPlan::base(true);
        let response = ReportResponse {
            dimension_headers: vec!["date".to_string(), CAMPAIGN_DIMENSION.to_string()],
            metric_headers: vec!["sessions".to_string()],
            rows: vec![row(&["20260102", ""], &["5"]), row(&["20260102", "c-1"], &["7"])],
            currency: None,
        };
        let facts = base_facts(&response, &plan, &range()).unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts.values().all(|f| f.campaign_id.is_some()));
        assert!(facts.values().any(|f| f.campaign_id.as_deref() == Some(NOT_SET)));
    }

    #[test]
    fn test_event_counts_merge_by_date_and_campaign() {
        let plan = FieldPlan::base(false);
        let base = ReportResponse {
            dimension_headers: vec!["date".to_string()],
            metric_headers: vec!["sessions".to_string()],
            rows: vec![row(&["20260101"], &["10"])],
            currency: None,
        };
        let mut facts = base_facts(&base, &plan, &range()).unwrap();

        let event_plan = FieldPlan::event_count(None);
        let events = ReportResponse {
            dimension_headers: vec!["date".to_string()],
            metric_headers: vec!["eventCount".to_string()],
            rows: vec![row(&["20260101"], &["3"]), row(&["20260102"], &["4"])],
            currency: None,
        };
        merge_event_counts(&mut facts, &events, &event_plan, &range(), BaseColumn::Leads)
            .unwrap();

        assert_eq!(facts.len(), 2);
        let day1 = &facts[&(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(), None)];
        assert_eq!(day1.sessions, 10);
        assert_eq!(day1.leads, 3.0);
        let day2 = &facts[&(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(), None)];
        assert_eq!(day2.leads, 4.0);
        assert_eq!(day2.sessions, 0);
    }
}
