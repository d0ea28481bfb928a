//! Collaborators used when the CLI runs without platform credentials

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::services::{
    BrandDirectory, IntegrationContext, IntegrationResolver, ReportFetcher, ReportRequest,
    ReportResponse, UpstreamError,
};
use crate::storage::SeaOrmStorage;

/// Fetcher that never reaches an upstream; materialization degrades to stale
pub struct OfflineFetcher;

#[async_trait]
impl ReportFetcher for OfflineFetcher {
    async fn fetch_report(
        &self,
        request: &ReportRequest,
    ) -> std::result::Result<ReportResponse, UpstreamError> {
        Err(UpstreamError::transient(format!(
            "Upstream reports are unavailable offline (account {})",
            request.account_id
        )))
    }
}

pub struct OfflineIntegrations;

#[async_trait]
impl IntegrationResolver for OfflineIntegrations {
    async fn resolve_integration_context(
        &self,
        _tenant_id: &str,
        _account_id: &str,
    ) -> Result<IntegrationContext> {
        Ok(IntegrationContext {
            integration_id: "offline".to_string(),
            user_id: "cli".to_string(),
        })
    }
}

/// Brands known from the binding table
pub struct BoundBrandDirectory {
    storage: Arc<SeaOrmStorage>,
}

impl BoundBrandDirectory {
    pub fn new(storage: Arc<SeaOrmStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl BrandDirectory for BoundBrandDirectory {
    async fn brand_exists(&self, tenant_id: &str, brand_id: &str) -> Result<bool> {
        Ok(self
            .storage
            .list_bound_brands(tenant_id)
            .await?
            .iter()
            .any(|b| b == brand_id))
    }

    async fn list_brands(&self, tenant_id: &str) -> Result<Vec<String>> {
        self.storage.list_bound_brands(tenant_id).await
    }
}
