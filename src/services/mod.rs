//! Service layer for the reporting core
//!
//! The binding registry, fact materializer, query engine and scope applicator
//! are plain structs over the shared storage. `ReportingCore` wires them
//! together for the REST layer and the CLI.

pub mod binding_registry;
pub mod collaborators;
pub mod materializer;
pub mod query;
pub mod reporting_core;
pub mod scope_applicator;
pub mod sync_dispatcher;

pub use binding_registry::{BindingChange, BindingRegistry};
pub use collaborators::{
    BrandDirectory, EnqueueOutcome, IntegrationContext, IntegrationResolver, JobEnqueuer,
    ReportFetcher, ReportFilter, ReportRequest, ReportResponse, ReportRow, SyncJob,
    UpstreamError, UpstreamErrorKind,
};
pub use materializer::{FreshnessRequest, MaterializeOutcome, Materializer, MaterializerSettings};
pub use query::request::QueryRequest;
pub use query::result::QueryResult;
pub use query::{QueryEngine, QuerySettings};
pub use reporting_core::{Collaborators, CoreSettings, ReportingCore};
pub use scope_applicator::{ScopeApplicator, ScopeApplySummary, ScopeMode, ScopeSelection};
pub use sync_dispatcher::{SyncDispatcher, SyncFailure};
