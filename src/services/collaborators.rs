//! Interfaces of the collaborators this core consumes
//!
//! Credential storage, the raw platform API clients, brand CRUD and the
//! durable job queue live outside this crate. They are reached only through
//! the traits below.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{ReportingError, Result};
use crate::storage::models::Platform;
use crate::utils::DateRange;

// ============ Report fetcher ============

/// Classified upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// A metric name was rejected (schema drift)
    UnsupportedMetric,
    /// A dimension name was rejected (schema drift)
    UnsupportedDimension,
    RateLimited,
    Unauthorized,
    Transient,
    Other,
}

impl UpstreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamErrorKind::UnsupportedMetric => "unsupported_metric",
            UpstreamErrorKind::UnsupportedDimension => "unsupported_dimension",
            UpstreamErrorKind::RateLimited => "rate_limited",
            UpstreamErrorKind::Unauthorized => "unauthorized",
            UpstreamErrorKind::Transient => "transient",
            UpstreamErrorKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    /// Rejected metric/dimension name, when the upstream names it
    pub field: Option<String>,
    pub message: String,
}

impl UpstreamError {
    pub fn new<T: Into<String>>(kind: UpstreamErrorKind, message: T) -> Self {
        Self {
            kind,
            field: None,
            message: message.into(),
        }
    }

    pub fn unsupported_metric<T: Into<String>>(name: T) -> Self {
        let name = name.into();
        Self {
            kind: UpstreamErrorKind::UnsupportedMetric,
            message: format!("Metric '{}' is not supported", name),
            field: Some(name),
        }
    }

    pub fn unsupported_dimension<T: Into<String>>(name: T) -> Self {
        let name = name.into();
        Self {
            kind: UpstreamErrorKind::UnsupportedDimension,
            message: format!("Dimension '{}' is not supported", name),
            field: Some(name),
        }
    }

    pub fn transient<T: Into<String>>(message: T) -> Self {
        Self::new(UpstreamErrorKind::Transient, message)
    }

    pub fn rate_limited<T: Into<String>>(message: T) -> Self {
        Self::new(UpstreamErrorKind::RateLimited, message)
    }

    pub fn is_schema_drift(&self) -> bool {
        matches!(
            self.kind,
            UpstreamErrorKind::UnsupportedMetric | UpstreamErrorKind::UnsupportedDimension
        )
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for UpstreamError {}

impl From<UpstreamError> for ReportingError {
    fn from(err: UpstreamError) -> Self {
        if err.is_schema_drift() {
            ReportingError::schema_drift(err.to_string())
        } else {
            ReportingError::upstream(err.to_string())
        }
    }
}

/// `field IN (values)` filter passed to the upstream report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFilter {
    pub field: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub account_id: String,
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub range: DateRange,
    pub filter: Option<ReportFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportRow {
    pub dimension_values: Vec<String>,
    pub metric_values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportResponse {
    pub dimension_headers: Vec<String>,
    pub metric_headers: Vec<String>,
    pub rows: Vec<ReportRow>,
    /// Account currency, when reported
    pub currency: Option<String>,
}

/// Fetches one report for an external account over a date range
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    async fn fetch_report(
        &self,
        request: &ReportRequest,
    ) -> std::result::Result<ReportResponse, UpstreamError>;
}

// ============ Credentials ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationContext {
    pub integration_id: String,
    pub user_id: String,
}

/// Resolves which stored credential may read an external account
#[async_trait]
pub trait IntegrationResolver: Send + Sync {
    /// Fails when no connected credential can read `account_id`
    async fn resolve_integration_context(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> Result<IntegrationContext>;
}

// ============ Brands ============

#[async_trait]
pub trait BrandDirectory: Send + Sync {
    async fn brand_exists(&self, tenant_id: &str, brand_id: &str) -> Result<bool>;

    /// All brands of a tenant (target set of an all-brands scope apply)
    async fn list_brands(&self, tenant_id: &str) -> Result<Vec<String>>;
}

// ============ Background jobs ============

/// Background materialization job; `job_id` is the dedupe identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub job_id: String,
    pub tenant_id: String,
    pub brand_id: String,
    pub platform: Platform,
    pub account_id: String,
}

impl SyncJob {
    pub fn ga4(tenant_id: &str, brand_id: &str, property_id: &str) -> Self {
        Self {
            job_id: format!("ga4-sync:{}:{}:{}", tenant_id, brand_id, property_id),
            tenant_id: tenant_id.to_string(),
            brand_id: brand_id.to_string(),
            platform: Platform::Ga4,
            account_id: property_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same id is still pending
    Duplicate,
}

#[async_trait]
pub trait JobEnqueuer: Send + Sync {
    async fn enqueue(&self, job: SyncJob) -> Result<EnqueueOutcome>;
}
