//! Run a metrics query from a JSON payload

use std::io::Read;

use colored::Colorize;

use super::{offline_core, open_storage};
use crate::cli::CliError;
use crate::services::QueryRequest;

fn read_payload(source: &str) -> Result<String, CliError> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| CliError::ParseError(format!("Failed to read stdin: {}", e)))?;
        return Ok(buf);
    }
    std::fs::read_to_string(source)
        .map_err(|e| CliError::ParseError(format!("Failed to read {}: {}", source, e)))
}

pub async fn query(tenant_id: &str, payload: &str, pretty: bool) -> Result<(), CliError> {
    let raw = read_payload(payload)?;
    let request: QueryRequest = serde_json::from_str(&raw)
        .map_err(|e| CliError::ParseError(format!("Invalid query payload: {}", e)))?;

    let core = offline_core(open_storage().await?);
    let result = core.query_metrics(tenant_id, &request).await?;

    let out = if pretty {
        serde_json::to_string_pretty(&result)
    } else {
        serde_json::to_string(&result)
    }
    .map_err(|e| CliError::CommandError(e.to_string()))?;
    println!("{}", out);

    if result.meta.sync.values().any(|s| {
        matches!(s, crate::services::query::result::SyncStatus::Stale)
    }) {
        eprintln!(
            "{}",
            "note: upstream reports are not fetched from the CLI; results reflect stored facts"
                .dimmed()
        );
    }
    Ok(())
}
