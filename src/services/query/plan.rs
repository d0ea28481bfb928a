//! Validation and normalization of a query payload
//!
//! Everything that can be checked without the database is checked here, so
//! invalid requests fail with a validation error before any I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::catalog::{self, MetricCatalogEntry, MetricKind};
use super::request::{CompareMode, Dimension, FilterOp, QueryRequest, SortDirection};
use crate::errors::{ReportingError, Result};
use crate::storage::backend::{
    AggregateSpec, BaseColumn, PlatformScope, SortKey, SortTarget,
};
use crate::storage::models::{FactScope, Platform};
use crate::utils::{DateRange, RangePreset};

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            max_page_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSpec {
    Explicit(DateRange),
    Preset(RangePreset),
}

impl RangeSpec {
    pub fn resolve(&self, timezone: &str, now: DateTime<Utc>) -> Result<DateRange> {
        match self {
            RangeSpec::Explicit(range) => Ok(*range),
            RangeSpec::Preset(preset) => preset.expand(timezone, now),
        }
    }
}

pub fn compare_range(range: &DateRange, mode: CompareMode) -> Result<DateRange> {
    match mode {
        CompareMode::PreviousPeriod => range.previous_period(),
        CompareMode::PreviousYear => range.previous_year(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedQuery {
    pub brand_id: String,
    pub range: RangeSpec,
    /// Explicit platforms plus platform filter values
    pub platforms: BTreeSet<Platform>,
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<String>,
    pub filters: BTreeMap<Dimension, Vec<String>>,
    pub sort: Option<(String, SortDirection)>,
    pub limit: u64,
    pub offset: u64,
    pub compare_to: Option<CompareMode>,
}

fn bad<T: Into<String>>(msg: T) -> ReportingError {
    ReportingError::validation(msg)
}

impl NormalizedQuery {
    pub fn from_request(request: &QueryRequest, limits: PageLimits) -> Result<Self> {
        let brand_id = request.brand_id.trim().to_string();
        if brand_id.is_empty() {
            return Err(bad("brandId is required"));
        }

        let range = match (&request.date_range, &request.preset) {
            (Some(_), Some(_)) => return Err(bad("Specify either dateRange or preset, not both")),
            (Some(explicit), None) => RangeSpec::Explicit(
                DateRange::new(explicit.start, explicit.end)
                    .map_err(|_| bad("dateRange.start must not be after dateRange.end"))?,
            ),
            (None, Some(preset)) => RangeSpec::Preset(*preset),
            (None, None) => RangeSpec::Preset(RangePreset::Last30Days),
        };

        let mut metrics: Vec<String> = Vec::new();
        for key in &request.metrics {
            let key = key.trim();
            catalog::lookup(key).ok_or_else(|| bad(format!("Unknown metric '{}'", key)))?;
            if !metrics.iter().any(|m| m == key) {
                metrics.push(key.to_string());
            }
        }
        if metrics.is_empty() {
            return Err(bad("At least one metric is required"));
        }

        let mut dimensions: Vec<Dimension> = Vec::new();
        for dim in &request.dimensions {
            if !dimensions.contains(dim) {
                dimensions.push(*dim);
            }
        }

        let mut platforms: BTreeSet<Platform> = request.platforms.iter().copied().collect();
        let mut filters: BTreeMap<Dimension, Vec<String>> = BTreeMap::new();
        for filter in &request.filters {
            let values: Vec<String> = filter
                .value
                .values()
                .into_iter()
                .map(|v| v.trim().to_string())
                .collect();
            if values.iter().any(String::is_empty) {
                return Err(bad(format!("Empty value in {} filter", filter.field.as_ref())));
            }
            match (filter.op, values.len()) {
                (FilterOp::Eq, 1) => {}
                (FilterOp::Eq, _) => {
                    return Err(bad(format!(
                        "eq filter on {} takes exactly one value",
                        filter.field.as_ref()
                    )));
                }
                (FilterOp::In, 0) => {
                    return Err(bad(format!(
                        "in filter on {} needs at least one value",
                        filter.field.as_ref()
                    )));
                }
                (FilterOp::In, _) => {}
            }
            for value in &values {
                match filter.field {
                    Dimension::Platform => {
                        let platform = Platform::from_str(value)
                            .map_err(|_| bad(format!("Unknown platform '{}'", value)))?;
                        platforms.insert(platform);
                    }
                    Dimension::Date => {
                        NaiveDate::parse_from_str(value, "%Y-%m-%d")
                            .map_err(|_| bad(format!("Invalid date '{}' in filter", value)))?;
                    }
                    Dimension::Account | Dimension::Campaign => {}
                }
            }
            let slot = filters.entry(filter.field).or_default();
            slot.extend(values);
            slot.sort();
            slot.dedup();
        }

        let sort = match &request.sort {
            Some(sort) => {
                let field = sort.field.trim();
                let is_dimension = Dimension::from_str(field)
                    .map(|d| dimensions.contains(&d))
                    .unwrap_or(false);
                if !is_dimension && !metrics.iter().any(|m| m == field) {
                    return Err(bad(format!(
                        "Cannot sort by '{}': not a requested dimension or metric",
                        field
                    )));
                }
                Some((field.to_string(), sort.direction))
            }
            None => None,
        };

        let limit = request.limit.unwrap_or(limits.default_page_size);
        if limit == 0 || limit > limits.max_page_size {
            return Err(bad(format!(
                "limit must be between 1 and {}",
                limits.max_page_size
            )));
        }

        Ok(Self {
            brand_id,
            range,
            platforms,
            dimensions,
            metrics,
            filters,
            sort,
            limit,
            offset: request.offset.unwrap_or(0),
            compare_to: request.compare_to,
        })
    }

    /// Stable cache fingerprint; presets are pinned to the UTC day
    pub fn fingerprint(&self, now: DateTime<Utc>) -> Result<String> {
        #[derive(Serialize)]
        struct Fingerprint<'a> {
            query: &'a NormalizedQuery,
            utc_day: Option<NaiveDate>,
        }
        let utc_day = match self.range {
            RangeSpec::Preset(_) => Some(now.date_naive()),
            RangeSpec::Explicit(_) => None,
        };
        Ok(serde_json::to_string(&Fingerprint {
            query: self,
            utc_day,
        })?)
    }

    pub fn scope(&self) -> FactScope {
        if self.dimensions.contains(&Dimension::Campaign)
            || self.filters.contains_key(&Dimension::Campaign)
        {
            FactScope::Campaign
        } else {
            FactScope::Aggregated
        }
    }

    /// Names handed to the materializer (dimensions plus filter fields)
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .dimensions
            .iter()
            .map(|d| d.as_ref().to_string())
            .collect();
        for field in self.filters.keys() {
            let name = field.as_ref().to_string();
            if !fields.contains(&name) {
                fields.push(name);
            }
        }
        fields
    }

    pub fn entries(&self) -> Vec<&'static MetricCatalogEntry> {
        self.metrics
            .iter()
            .filter_map(|key| catalog::lookup(key))
            .collect()
    }

    /// Base columns to sum: requested base metrics plus formula inputs
    pub fn base_columns(&self) -> Vec<BaseColumn> {
        let columns: BTreeSet<BaseColumn> = self
            .entries()
            .iter()
            .flat_map(|entry| entry.required_columns())
            .collect();
        columns.into_iter().collect()
    }

    fn sort_key(&self) -> Option<SortKey> {
        let (field, direction) = self.sort.as_ref()?;
        let target = match Dimension::from_str(field) {
            Ok(dim) => SortTarget::Dimension(dim.column()),
            Err(_) => match catalog::lookup(field)?.kind {
                MetricKind::Base(column) => SortTarget::Base(column),
                MetricKind::Derived(formula) => formula.sort_target(),
            },
        };
        Some(SortKey {
            target,
            descending: *direction == SortDirection::Desc,
        })
    }

    pub fn aggregate_spec(
        &self,
        tenant_id: &str,
        range: DateRange,
        scopes: Vec<PlatformScope>,
    ) -> AggregateSpec {
        AggregateSpec {
            tenant_id: tenant_id.to_string(),
            brand_id: self.brand_id.clone(),
            range,
            scopes,
            dimensions: self.dimensions.iter().map(Dimension::column).collect(),
            bases: self.base_columns(),
            filters: self
                .filters
                .iter()
                .map(|(dim, values)| (dim.column(), values.clone()))
                .collect(),
            sort: self.sort_key(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query::request::{FilterInput, FilterValue, SortInput};

    fn request() -> QueryRequest {
        QueryRequest {
            brand_id: "b".to_string(),
            metrics: vec!["clicks".to_string(), "ctr".to_string(), "clicks".to_string()],
            dimensions: vec![Dimension::Date, Dimension::Date],
            ..Default::default()
        }
    }

    #[test]
    fn test_metrics_and_dimensions_are_deduplicated() {
        let q = NormalizedQuery::from_request(&request(), PageLimits::default()).unwrap();
        assert_eq!(q.metrics, vec!["clicks", "ctr"]);
        assert_eq!(q.dimensions, vec![Dimension::Date]);
        assert_eq!(q.base_columns(), vec![BaseColumn::Impressions, BaseColumn::Clicks]);
        assert_eq!(q.range, RangeSpec::Preset(RangePreset::Last30Days));
    }

    #[test]
    fn test_unknown_metric_and_bad_sort_are_validation_errors() {
        let mut r = request();
        r.metrics.push("bounce_rate".to_string());
        let err = NormalizedQuery::from_request(&r, PageLimits::default()).unwrap_err();
        assert_eq!(err.http_status(), 400);

        let mut r = request();
        r.sort = Some(SortInput {
            field: "spend".to_string(),
            direction: SortDirection::Asc,
        });
        assert!(NormalizedQuery::from_request(&r, PageLimits::default()).is_err());

        let mut r = request();
        r.sort = Some(SortInput {
            field: "campaign".to_string(),
            direction: SortDirection::Asc,
        });
        assert!(NormalizedQuery::from_request(&r, PageLimits::default()).is_err());
    }

    #[test]
    fn test_platform_filter_adds_required_platform() {
        let mut r = request();
        r.platforms = vec![Platform::Meta];
        r.filters = vec![FilterInput {
            field: Dimension::Platform,
            op: FilterOp::In,
            value: FilterValue::Many(vec!["ga4".to_string(), "tiktok".to_string()]),
        }];
        let q = NormalizedQuery::from_request(&r, PageLimits::default()).unwrap();
        assert_eq!(
            q.platforms.into_iter().collect::<Vec<_>>(),
            vec![Platform::Ga4, Platform::Meta, Platform::Tiktok]
        );

        r.filters[0].value = FilterValue::Many(vec!["myspace".to_string()]);
        assert!(NormalizedQuery::from_request(&r, PageLimits::default()).is_err());
    }

    #[test]
    fn test_eq_filter_needs_single_value() {
        let mut r = request();
        r.filters = vec![FilterInput {
            field: Dimension::Campaign,
            op: FilterOp::Eq,
            value: FilterValue::Many(vec!["a".to_string(), "b".to_string()]),
        }];
        assert!(NormalizedQuery::from_request(&r, PageLimits::default()).is_err());
    }

    #[test]
    fn test_campaign_filter_selects_campaign_scope() {
        let mut r = request();
        assert_eq!(
            NormalizedQuery::from_request(&r, PageLimits::default())
                .unwrap()
                .scope(),
            FactScope::Aggregated
        );
        r.filters = vec![FilterInput {
            field: Dimension::Campaign,
            op: FilterOp::Eq,
            value: FilterValue::One("c1".to_string()),
        }];
        let q = NormalizedQuery::from_request(&r, PageLimits::default()).unwrap();
        assert_eq!(q.scope(), FactScope::Campaign);
        assert_eq!(q.referenced_fields(), vec!["date", "campaign"]);
    }

    #[test]
    fn test_limit_bounds() {
        let mut r = request();
        r.limit = Some(0);
        assert!(NormalizedQuery::from_request(&r, PageLimits::default()).is_err());
        r.limit = Some(5000);
        assert!(NormalizedQuery::from_request(&r, PageLimits::default()).is_err());
        r.limit = Some(10);
        assert_eq!(
            NormalizedQuery::from_request(&r, PageLimits::default())
                .unwrap()
                .limit,
            10
        );
    }

    #[test]
    fn test_fingerprint_ignores_payload_ordering() {
        let mut a = request();
        a.filters = vec![FilterInput {
            field: Dimension::Campaign,
            op: FilterOp::In,
            value: FilterValue::Many(vec!["b".to_string(), "a".to_string()]),
        }];
        let mut b = a.clone();
        b.filters[0].value = FilterValue::Many(vec!["a".to_string(), "b".to_string()]);

        let now = Utc::now();
        let qa = NormalizedQuery::from_request(&a, PageLimits::default()).unwrap();
        let qb = NormalizedQuery::from_request(&b, PageLimits::default()).unwrap();
        assert_eq!(qa.fingerprint(now).unwrap(), qb.fingerprint(now).unwrap());

        let mut c = a.clone();
        c.offset = Some(100);
        let qc = NormalizedQuery::from_request(&c, PageLimits::default()).unwrap();
        assert_ne!(qa.fingerprint(now).unwrap(), qc.fingerprint(now).unwrap());
    }

    #[test]
    fn test_derived_sort_becomes_ratio() {
        let mut r = request();
        r.sort = Some(SortInput {
            field: "ctr".to_string(),
            direction: SortDirection::Desc,
        });
        let q = NormalizedQuery::from_request(&r, PageLimits::default()).unwrap();
        let spec = q.aggregate_spec("t", DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
        ).unwrap(), Vec::new());
        assert!(matches!(
            spec.sort,
            Some(SortKey {
                target: SortTarget::Ratio { .. },
                descending: true
            })
        ));
    }
}
