//! CLI command handlers

mod bindings;
mod config_gen;
mod offline;
mod query;

pub use bindings::{bind, migrate, status, update_settings};
pub use config_gen::config_generate;
pub use offline::{BoundBrandDirectory, OfflineFetcher, OfflineIntegrations};
pub use query::query;

use std::sync::Arc;

use crate::cli::CliError;
use crate::clock::SystemClock;
use crate::config::get_config;
use crate::services::{Collaborators, CoreSettings, ReportingCore};
use crate::storage::{SeaOrmStorage, StorageFactory};

async fn open_storage() -> Result<Arc<SeaOrmStorage>, CliError> {
    StorageFactory::create()
        .await
        .map_err(|e| CliError::StorageError(e.to_string()))
}

/// Core wired with offline collaborators: no upstream reports, brands taken
/// from the binding table
fn offline_core(storage: Arc<SeaOrmStorage>) -> ReportingCore {
    let config = get_config();
    let collaborators = Collaborators {
        fetcher: Arc::new(OfflineFetcher),
        integrations: Arc::new(OfflineIntegrations),
        brands: Arc::new(BoundBrandDirectory::new(storage.clone())),
        enqueuer: None,
    };
    ReportingCore::with_metrics(
        storage,
        collaborators,
        SystemClock::arc(),
        CoreSettings::from_config(&config),
        crate::metrics_core::default_recorder(),
    )
}
