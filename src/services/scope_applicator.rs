//! Property-scope applicator
//!
//! Propagates a newly selected GA4 property to one brand or to every brand of
//! a tenant. Each brand is switched independently; a failing brand is
//! recorded and the batch carries on.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{ReportingError, Result};
use crate::metrics_core::{MetricsRecorder, NoopMetrics};
use crate::services::binding_registry::BindingRegistry;
use crate::services::collaborators::{BrandDirectory, EnqueueOutcome, JobEnqueuer, SyncJob};
use crate::storage::models::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    SingleBrand,
    AllBrands,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSelection {
    pub property_id: String,
    pub mode: ScopeMode,
    /// Required for `SingleBrand`
    #[serde(default)]
    pub brand_id: Option<String>,
    /// Queue a background materialization per updated brand
    #[serde(default = "default_enqueue_sync")]
    pub enqueue_sync: bool,
}

fn default_enqueue_sync() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandFailure {
    pub brand_id: String,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeApplySummary {
    pub affected: usize,
    pub succeeded: usize,
    /// Brands whose binding actually moved to the property
    pub changed: usize,
    pub failed: usize,
    pub failures: Vec<BrandFailure>,
    pub sync_enqueued: usize,
    pub sync_duplicates: usize,
    pub sync_enqueue_failed: usize,
}

pub struct ScopeApplicator {
    registry: Arc<BindingRegistry>,
    brands: Arc<dyn BrandDirectory>,
    enqueuer: Arc<dyn JobEnqueuer>,
    metrics: Arc<dyn MetricsRecorder>,
    parallelism: usize,
}

impl ScopeApplicator {
    pub fn new(
        registry: Arc<BindingRegistry>,
        brands: Arc<dyn BrandDirectory>,
        enqueuer: Arc<dyn JobEnqueuer>,
        parallelism: usize,
    ) -> Self {
        Self {
            registry,
            brands,
            enqueuer,
            metrics: NoopMetrics::arc(),
            parallelism: parallelism.max(1),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    async fn target_brands(&self, tenant_id: &str, selection: &ScopeSelection) -> Result<Vec<String>> {
        match selection.mode {
            ScopeMode::SingleBrand => {
                let brand_id = selection
                    .brand_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| {
                        ReportingError::validation("brandId is required for single-brand scope")
                    })?;
                if !self.brands.brand_exists(tenant_id, brand_id).await? {
                    return Err(ReportingError::not_found(format!(
                        "Brand '{}' not found",
                        brand_id
                    )));
                }
                Ok(vec![brand_id.to_string()])
            }
            ScopeMode::AllBrands => {
                let mut brands = self.brands.list_brands(tenant_id).await?;
                brands.sort();
                brands.dedup();
                Ok(brands)
            }
        }
    }

    /// Switch the GA4 property of the selected brands
    ///
    /// Only target resolution can fail the call; per-brand failures land in
    /// the summary.
    pub async fn apply_scope_selection(
        &self,
        tenant_id: &str,
        selection: &ScopeSelection,
    ) -> Result<ScopeApplySummary> {
        let property_id = selection.property_id.trim();
        if property_id.is_empty() {
            return Err(ReportingError::validation("propertyId must not be empty"));
        }
        let targets = self.target_brands(tenant_id, selection).await?;

        let results: Vec<(String, Result<bool>)> = stream::iter(targets)
            .map(|brand_id| async move {
                let outcome = self
                    .registry
                    .set_active_account(tenant_id, &brand_id, Platform::Ga4, property_id)
                    .await
                    .map(|change| change.changed);
                (brand_id, outcome)
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut summary = ScopeApplySummary {
            affected: results.len(),
            ..Default::default()
        };
        let mut updated = Vec::new();
        for (brand_id, outcome) in results {
            match outcome {
                Ok(changed) => {
                    summary.succeeded += 1;
                    if changed {
                        summary.changed += 1;
                    }
                    self.metrics.inc_scope_apply("ok");
                    updated.push(brand_id);
                }
                Err(e) => {
                    warn!(
                        tenant_id,
                        brand_id = %brand_id,
                        property_id,
                        "Scope apply failed for brand: {}",
                        e
                    );
                    self.metrics.inc_scope_apply("failed");
                    summary.failed += 1;
                    summary.failures.push(BrandFailure {
                        brand_id,
                        code: e.code().to_string(),
                        reason: e.message(),
                    });
                }
            }
        }
        summary.failures.sort_by(|a, b| a.brand_id.cmp(&b.brand_id));

        if selection.enqueue_sync {
            updated.sort();
            for brand_id in &updated {
                match self
                    .enqueuer
                    .enqueue(SyncJob::ga4(tenant_id, brand_id, property_id))
                    .await
                {
                    Ok(EnqueueOutcome::Enqueued) => summary.sync_enqueued += 1,
                    Ok(EnqueueOutcome::Duplicate) => summary.sync_duplicates += 1,
                    Err(e) => {
                        warn!(tenant_id, brand_id = %brand_id, "Failed to enqueue sync: {}", e);
                        summary.sync_enqueue_failed += 1;
                    }
                }
            }
        }

        info!(
            tenant_id,
            property_id,
            affected = summary.affected,
            succeeded = summary.succeeded,
            failed = summary.failed,
            sync_enqueued = summary.sync_enqueued,
            "Scope selection applied"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_deserializes_with_default_enqueue() {
        let json = r#"{"propertyId": "properties/1", "mode": "all_brands"}"#;
        let selection: ScopeSelection = serde_json::from_str(json).unwrap();
        assert_eq!(selection.mode, ScopeMode::AllBrands);
        assert!(selection.enqueue_sync);
        assert_eq!(selection.brand_id, None);
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = ScopeApplySummary {
            affected: 2,
            succeeded: 1,
            failed: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["syncEnqueued"], 0);
        assert_eq!(json["failed"], 1);
    }
}
