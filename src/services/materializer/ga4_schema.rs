//! GA4 Data API field names and schema-drift fallback
//!
//! The upstream renames fields from time to time. Each canonical field has a
//! primary upstream name and at most one documented alternate. A rejected
//! metric is retried once under its alternate and then dropped. The campaign
//! dimension is only requested for campaign breakdowns, so when its alternate
//! is rejected too the fetch aborts instead of writing aggregated rows.

use tracing::warn;

use crate::errors::{ReportingError, Result};
use crate::services::collaborators::{UpstreamError, UpstreamErrorKind};
use crate::storage::backend::BaseColumn;

pub const DATE_DIMENSION: &str = "date";
pub const DATE_FORMAT: &str = "%Y%m%d";
pub const EVENT_COUNT_METRIC: &str = "eventCount";
pub const EVENT_NAME_DIMENSION: &str = "eventName";
pub const CAMPAIGN_DIMENSION: &str = "sessionCampaignId";
pub const CAMPAIGN_DIMENSION_ALT: &str = "campaignId";

/// Upper bound on fetch attempts while negotiating the schema
pub const MAX_SCHEMA_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricMapping {
    pub column: BaseColumn,
    pub primary: &'static str,
    pub alternate: Option<&'static str>,
}

/// Base metrics fetched on every materialization
pub const METRIC_MAPPINGS: &[MetricMapping] = &[
    MetricMapping {
        column: BaseColumn::Sessions,
        primary: "sessions",
        alternate: None,
    },
    MetricMapping {
        column: BaseColumn::Conversions,
        primary: "keyEvents",
        alternate: Some("conversions"),
    },
    MetricMapping {
        column: BaseColumn::Revenue,
        primary: "totalRevenue",
        alternate: Some("purchaseRevenue"),
    },
    MetricMapping {
        column: BaseColumn::Spend,
        primary: "advertiserAdCost",
        alternate: None,
    },
    MetricMapping {
        column: BaseColumn::Impressions,
        primary: "advertiserAdImpressions",
        alternate: None,
    },
    MetricMapping {
        column: BaseColumn::Clicks,
        primary: "advertiserAdClicks",
        alternate: None,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct MetricSlot {
    column: BaseColumn,
    current: &'static str,
    alternate: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CampaignSlot {
    current: &'static str,
    alternate: Option<&'static str>,
}

/// Field selection that is adjusted as the upstream rejects names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPlan {
    metrics: Vec<MetricSlot>,
    campaign: Option<CampaignSlot>,
    /// Fields given up on during negotiation, for logging
    pub dropped: Vec<String>,
}

impl FieldPlan {
    /// Full base metric set; with the campaign dimension when `campaign` is set
    pub fn base(campaign: bool) -> Self {
        Self {
            metrics: METRIC_MAPPINGS
                .iter()
                .map(|m| MetricSlot {
                    column: m.column,
                    current: m.primary,
                    alternate: m.alternate,
                })
                .collect(),
            campaign: campaign.then(Self::campaign_slot),
            dropped: Vec::new(),
        }
    }

    /// `eventCount` plan for the filtered event fetch
    pub fn event_count(campaign_dimension: Option<&'static str>) -> Self {
        Self {
            metrics: vec![MetricSlot {
                column: BaseColumn::Leads,
                current: EVENT_COUNT_METRIC,
                alternate: None,
            }],
            campaign: campaign_dimension.map(|name| CampaignSlot {
                current: name,
                alternate: None,
            }),
            dropped: Vec::new(),
        }
    }

    fn campaign_slot() -> CampaignSlot {
        CampaignSlot {
            current: CAMPAIGN_DIMENSION,
            alternate: Some(CAMPAIGN_DIMENSION_ALT),
        }
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.current.to_string()).collect()
    }

    pub fn dimension_names(&self) -> Vec<String> {
        let mut dims = vec![DATE_DIMENSION.to_string()];
        if let Some(campaign) = &self.campaign {
            dims.push(campaign.current.to_string());
        }
        dims
    }

    /// Upstream name currently used for a canonical metric
    pub fn metric_name(&self, column: BaseColumn) -> Option<&'static str> {
        self.metrics
            .iter()
            .find(|m| m.column == column)
            .map(|m| m.current)
    }

    pub fn campaign_dimension(&self) -> Option<&'static str> {
        self.campaign.as_ref().map(|c| c.current)
    }

    /// Adjust the plan after a rejection. `Ok(field)` names the fallback taken;
    /// `Err` means the fetch cannot continue.
    pub fn apply_rejection(&mut self, err: &UpstreamError) -> Result<String> {
        let field = err.field.as_deref().unwrap_or_default();
        match err.kind {
            UpstreamErrorKind::UnsupportedMetric => self.reject_metric(field, err),
            UpstreamErrorKind::UnsupportedDimension => self.reject_dimension(field, err),
            _ => Err(err.clone().into()),
        }
    }

    fn reject_metric(&mut self, field: &str, err: &UpstreamError) -> Result<String> {
        let Some(idx) = self.metrics.iter().position(|m| m.current == field) else {
            return Err(err.clone().into());
        };
        let slot = &mut self.metrics[idx];
        if let Some(alternate) = slot.alternate.take() {
            warn!(rejected = field, alternate, "Upstream rejected metric, trying alternate");
            slot.current = alternate;
            return Ok(field.to_string());
        }

        warn!(rejected = field, "Upstream rejected metric, dropping it");
        self.metrics.remove(idx);
        self.dropped.push(field.to_string());
        if self.metrics.is_empty() {
            return Err(ReportingError::schema_drift(format!(
                "Every requested metric was rejected (last: {})",
                field
            )));
        }
        Ok(field.to_string())
    }

    fn reject_dimension(&mut self, field: &str, err: &UpstreamError) -> Result<String> {
        let Some(campaign) = self.campaign.as_mut().filter(|c| c.current == field) else {
            // 日期维度不可省略
            return Err(err.clone().into());
        };
        if let Some(alternate) = campaign.alternate.take() {
            warn!(rejected = field, alternate, "Upstream rejected dimension, trying alternate");
            campaign.current = alternate;
            return Ok(field.to_string());
        }
        Err(ReportingError::schema_drift(format!(
            "Campaign dimension '{}' rejected; refusing to write campaign facts without it",
            field
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_tries_alternate_then_drops() {
        let mut plan = FieldPlan::base(false);
        plan.apply_rejection(&UpstreamError::unsupported_metric("keyEvents"))
            .unwrap();
        assert_eq!(plan.metric_name(BaseColumn::Conversions), Some("conversions"));

        plan.apply_rejection(&UpstreamError::unsupported_metric("conversions"))
            .unwrap();
        assert_eq!(plan.metric_name(BaseColumn::Conversions), None);
        assert_eq!(plan.dropped, vec!["conversions".to_string()]);
        assert!(plan.metric_names().contains(&"sessions".to_string()));
    }

    #[test]
    fn test_metric_without_alternate_is_dropped_immediately() {
        let mut plan = FieldPlan::base(false);
        plan.apply_rejection(&UpstreamError::unsupported_metric("advertiserAdCost"))
            .unwrap();
        assert_eq!(plan.metric_name(BaseColumn::Spend), None);
    }

    #[test]
    fn test_campaign_dimension_never_silently_downgraded() {
        let mut plan = FieldPlan::base(true);
        plan.apply_rejection(&UpstreamError::unsupported_dimension(CAMPAIGN_DIMENSION))
            .unwrap();
        assert_eq!(plan.campaign_dimension(), Some(CAMPAIGN_DIMENSION_ALT));

        let err = plan
            .apply_rejection(&UpstreamError::unsupported_dimension(CAMPAIGN_DIMENSION_ALT))
            .unwrap_err();
        assert!(matches!(err, ReportingError::SchemaDrift(_)));
    }

    #[test]
    fn test_date_dimension_rejection_aborts() {
        let mut plan = FieldPlan::base(false);
        assert!(plan
            .apply_rejection(&UpstreamError::unsupported_dimension(DATE_DIMENSION))
            .is_err());
    }

    #[test]
    fn test_unknown_or_transient_errors_abort() {
        let mut plan = FieldPlan::base(false);
        assert!(plan
            .apply_rejection(&UpstreamError::unsupported_metric("bogus"))
            .is_err());
        assert!(plan
            .apply_rejection(&UpstreamError::transient("503"))
            .is_err());
    }
}
