//! Operator command-line interface
//!
//! Command definitions use clap's derive macros; the handlers live in
//! `commands`.

pub mod commands;

use std::fmt;

use clap::{Parser, Subcommand};

use crate::storage::Platform;

/// BrandPulse - marketing fact store and metrics query engine
#[derive(Parser)]
#[command(name = "brandpulse")]
#[command(version)]
#[command(about = "Marketing fact materialization and metrics queries", long_about = None)]
pub struct Cli {
    /// Configuration file (default: config.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the database and apply pending migrations
    Migrate,

    /// Make an external account the active binding of a brand
    Bind {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        brand: String,

        /// ga4, meta, google_ads, tiktok, linkedin
        #[arg(long)]
        platform: Platform,

        /// External account id (GA4 property id for ga4)
        #[arg(long)]
        account: String,
    },

    /// Show bindings and GA4 settings of a brand
    Status {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        brand: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Update GA4 settings of a brand
    Settings {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        brand: String,

        /// IANA timezone, e.g. Europe/Berlin
        #[arg(long)]
        timezone: Option<String>,

        /// Comma separated GA4 event names counted as leads
        #[arg(long, value_delimiter = ',')]
        lead_events: Option<Vec<String>>,

        /// Comma separated GA4 event names counted as conversions
        #[arg(long, value_delimiter = ',')]
        conversion_events: Option<Vec<String>>,
    },

    /// Run a metrics query against the stored facts
    Query {
        #[arg(long)]
        tenant: String,

        /// JSON query payload file ("-" reads stdin)
        #[arg(long)]
        payload: String,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Configuration management commands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Generate {
        /// Output path (default: config.example.toml)
        output_path: Option<String>,

        /// Force overwrite without confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug)]
pub enum CliError {
    StorageError(String),
    ParseError(String),
    CommandError(String),
}

impl CliError {
    /// Format as simple output
    pub fn format_simple(&self) -> String {
        match self {
            CliError::StorageError(msg) => format!("Storage error: {}", msg),
            CliError::ParseError(msg) => format!("Parse error: {}", msg),
            CliError::CommandError(msg) => format!("Command error: {}", msg),
        }
    }

    /// Format as colored output
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        match self {
            CliError::StorageError(msg) => {
                format!("{} {}", "Storage error:".red().bold(), msg.white())
            }
            CliError::ParseError(msg) => {
                format!("{} {}", "Parse error:".yellow().bold(), msg.white())
            }
            CliError::CommandError(msg) => {
                format!("{} {}", "Command error:".red().bold(), msg.white())
            }
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for CliError {}

impl From<crate::errors::ReportingError> for CliError {
    fn from(err: crate::errors::ReportingError) -> Self {
        match err {
            crate::errors::ReportingError::Validation(_) => CliError::ParseError(err.message()),
            crate::errors::ReportingError::DatabaseConfig(_)
            | crate::errors::ReportingError::DatabaseConnection(_)
            | crate::errors::ReportingError::DatabaseOperation(_) => {
                CliError::StorageError(err.message())
            }
            other => CliError::CommandError(other.format_simple()),
        }
    }
}

/// Run a CLI command from clap-parsed input
pub async fn run_cli_command(cmd: Commands) -> Result<(), CliError> {
    match cmd {
        Commands::Config {
            action: ConfigCommands::Generate { output_path, force },
        } => commands::config_generate(output_path, force).await,
        Commands::Migrate => commands::migrate().await,
        Commands::Bind {
            tenant,
            brand,
            platform,
            account,
        } => commands::bind(&tenant, &brand, platform, &account).await,
        Commands::Status {
            tenant,
            brand,
            json,
        } => commands::status(&tenant, &brand, json).await,
        Commands::Settings {
            tenant,
            brand,
            timezone,
            lead_events,
            conversion_events,
        } => {
            commands::update_settings(&tenant, &brand, timezone, lead_events, conversion_events)
                .await
        }
        Commands::Query {
            tenant,
            payload,
            pretty,
        } => commands::query(&tenant, &payload, pretty).await,
    }
}
