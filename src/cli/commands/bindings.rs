//! Migration, binding and GA4 settings commands

use colored::Colorize;

use super::{offline_core, open_storage};
use crate::cli::CliError;
use crate::storage::{Ga4SettingsPatch, Platform};

pub async fn migrate() -> Result<(), CliError> {
    // 连接时会执行全部迁移
    let storage = open_storage().await?;
    println!(
        "{} {}",
        "Migrations applied on".green(),
        storage.backend().as_str().blue()
    );
    Ok(())
}

pub async fn bind(
    tenant_id: &str,
    brand_id: &str,
    platform: Platform,
    account_id: &str,
) -> Result<(), CliError> {
    let core = offline_core(open_storage().await?);
    let change = core
        .set_active_account(tenant_id, brand_id, platform, account_id)
        .await?;

    if change.changed {
        println!(
            "{} {} {} {} {}",
            "✓".bold().green(),
            brand_id.cyan(),
            platform.as_str().yellow(),
            "→".dimmed(),
            account_id.blue()
        );
        println!(
            "  {} {}",
            "Binding version:".dimmed(),
            change.binding.version
        );
    } else {
        println!(
            "{} {} is already bound to {}",
            "ℹ".bold().blue(),
            brand_id.cyan(),
            account_id.blue()
        );
    }
    Ok(())
}

pub async fn status(tenant_id: &str, brand_id: &str, json: bool) -> Result<(), CliError> {
    let storage = open_storage().await?;
    let bindings = storage.list_bindings(tenant_id, brand_id).await?;
    let settings = storage.get_ga4_settings(tenant_id, brand_id).await?;

    if json {
        let value = serde_json::json!({
            "bindings": bindings,
            "ga4Settings": settings,
        });
        let out = serde_json::to_string_pretty(&value)
            .map_err(|e| CliError::CommandError(e.to_string()))?;
        println!("{}", out);
        return Ok(());
    }

    println!("{} {}", "Brand".bold().green(), brand_id.cyan());
    if bindings.is_empty() {
        println!("  {}", "No bindings".dimmed());
    }
    for binding in &bindings {
        let status = if binding.is_active() {
            binding.status.green()
        } else {
            binding.status.dimmed()
        };
        println!(
            "  {:<11} {:<28} {:<13} v{}",
            binding.platform.as_str().yellow(),
            binding.account_id,
            status,
            binding.version
        );
    }

    match settings {
        Some(s) => {
            println!("{}", "GA4 settings".bold().green());
            println!(
                "  {}:    {}",
                "Property".cyan(),
                s.property_id.as_deref().unwrap_or("-")
            );
            println!("  {}:    {}", "Timezone".cyan(), s.timezone);
            println!(
                "  {}: {}",
                "Lead events".cyan(),
                s.lead_event_names.join(", ")
            );
            if !s.conversion_event_names.is_empty() {
                println!(
                    "  {}: {}",
                    "Conversions".cyan(),
                    s.conversion_event_names.join(", ")
                );
            }
            if let Some(at) = s.last_sync_at {
                println!("  {}:   {}", "Last sync".cyan(), at.to_rfc3339().dimmed());
            }
            if let Some(cursor) = s.backfill_cursor.as_deref() {
                println!("  {}:    {}", "Covered".cyan(), cursor.dimmed());
            }
            if let Some(err) = s.last_error.as_deref() {
                println!("  {}:  {}", "Last error".red(), err);
            }
        }
        None => println!("{}", "No GA4 settings".dimmed()),
    }
    Ok(())
}

pub async fn update_settings(
    tenant_id: &str,
    brand_id: &str,
    timezone: Option<String>,
    lead_events: Option<Vec<String>>,
    conversion_events: Option<Vec<String>>,
) -> Result<(), CliError> {
    if timezone.is_none() && lead_events.is_none() && conversion_events.is_none() {
        return Err(CliError::ParseError(
            "Nothing to update: pass --timezone, --lead-events or --conversion-events".to_string(),
        ));
    }
    let core = offline_core(open_storage().await?);
    let updated = core
        .update_ga4_settings(
            tenant_id,
            brand_id,
            Ga4SettingsPatch {
                timezone,
                lead_event_names: lead_events,
                conversion_event_names: conversion_events,
            },
        )
        .await?;
    println!(
        "{} {} {}",
        "✓".bold().green(),
        "GA4 settings updated for".green(),
        brand_id.cyan()
    );
    println!("  {}: {}", "Timezone".cyan(), updated.timezone);
    Ok(())
}
