//! BrandPulse - reporting core for multi-tenant marketing dashboards
//!
//! This library materializes per-day marketing facts from upstream platform
//! reports into a relational fact store and answers declarative metric
//! queries over them.
//!
//! # Features
//! - **cli**: Operator command-line interface (default)
//! - **metrics**: Prometheus metrics export
//! - **full**: All features enabled
//!
//! # Architecture
//! - `utils`: Timezone-aware rolling date ranges
//! - `storage`: SeaORM fact store, bindings, GA4 settings and the brand lock
//! - `services`: Binding registry, fact materializer, query engine, scope applicator
//! - `cache`: Query result cache and per-brand concurrency gate
//! - `config`: Configuration management
//! - `system`: Logging initialization

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod metrics_core;
pub mod services;
pub mod storage;
pub mod system;
pub mod utils;
