//! Brand platform-binding registry
//!
//! Keeps at most one ACTIVE external account per (tenant, brand, platform)
//! and, for GA4, the canonical per-brand settings that mirror it.

use std::str::FromStr;
use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::cache::BrandCacheInvalidator;
use crate::clock::Clock;
use crate::errors::{ReportingError, Result};
use crate::storage::SeaOrmStorage;
use crate::storage::backend::{bindings, facts, settings};
use crate::storage::models::{
    ActiveAccount, BindingRecord, Ga4Defaults, Ga4Settings, Ga4SettingsPatch, Platform,
};

/// Result of `set_active_account`
#[derive(Debug, Clone)]
pub struct BindingChange {
    pub binding: BindingRecord,
    /// False when the account was already the sole ACTIVE binding
    pub changed: bool,
}

pub struct BindingRegistry {
    storage: Arc<SeaOrmStorage>,
    invalidator: Arc<dyn BrandCacheInvalidator>,
    clock: Arc<dyn Clock>,
    defaults: Ga4Defaults,
}

impl BindingRegistry {
    pub fn new(
        storage: Arc<SeaOrmStorage>,
        invalidator: Arc<dyn BrandCacheInvalidator>,
        clock: Arc<dyn Clock>,
        defaults: Ga4Defaults,
    ) -> Self {
        Self {
            storage,
            invalidator,
            clock,
            defaults,
        }
    }

    pub fn storage(&self) -> &Arc<SeaOrmStorage> {
        &self.storage
    }

    /// Currently authoritative account for the tuple, if any
    ///
    /// GA4 settings cache the ACTIVE binding; the cache is trusted only when
    /// it names the sole ACTIVE binding at its current version. Duplicates
    /// and any settings mismatch are reconciled under the brand lock.
    pub async fn resolve_active_account(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
    ) -> Result<Option<ActiveAccount>> {
        let active = self
            .storage
            .active_bindings(tenant_id, brand_id, platform)
            .await?;

        if platform == Platform::Ga4 {
            let cached = self
                .storage
                .get_ga4_settings(tenant_id, brand_id)
                .await?
                .and_then(|s| s.property_id.map(|p| (p, s.binding_version)));
            return match (active.as_slice(), cached) {
                ([], None) => Ok(None),
                ([only], Some((property_id, version)))
                    if only.account_id == property_id && only.version == version =>
                {
                    Ok(Some(ActiveAccount {
                        account_id: property_id,
                        version,
                    }))
                }
                _ => self.reconcile(tenant_id, brand_id, platform).await,
            };
        }

        match active.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(ActiveAccount {
                account_id: only.account_id.clone(),
                version: only.version,
            })),
            _ => self.reconcile(tenant_id, brand_id, platform).await,
        }
    }

    /// Keep the most recently updated ACTIVE binding, demote the rest, purge
    /// facts of every other account and rewrite the GA4 settings from it
    async fn reconcile(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
    ) -> Result<Option<ActiveAccount>> {
        let now = self.clock.now();
        let defaults = self.defaults.clone();
        let (t, b) = (tenant_id.to_string(), brand_id.to_string());

        let (account, demoted, purged, resynced) = self
            .storage
            .with_brand_lock(tenant_id, brand_id, move |txn| {
                Box::pin(async move {
                    let active = bindings::active_bindings_in(txn, &t, &b, platform).await?;
                    let cached = if platform == Platform::Ga4 {
                        settings::property_in(txn, &t, &b).await?
                    } else {
                        None
                    };

                    let Some(keep) = active.first() else {
                        let resynced = cached.is_some();
                        if resynced {
                            settings::set_property_in(txn, &t, &b, None, 0, &defaults, now)
                                .await?;
                        }
                        return Ok((None, 0, 0, resynced));
                    };

                    let demoted =
                        bindings::demote_active_in(txn, &t, &b, platform, Some(keep.id), now)
                            .await?;
                    let purged = facts::purge_other_accounts_in(
                        txn,
                        &t,
                        &b,
                        platform,
                        Some(&keep.account_id),
                    )
                    .await?;

                    let mut resynced = false;
                    if platform == Platform::Ga4 {
                        resynced = cached.as_ref().is_none_or(|(property_id, version)| {
                            *property_id != keep.account_id || *version != keep.version
                        });
                        settings::set_property_in(
                            txn,
                            &t,
                            &b,
                            Some(&keep.account_id),
                            keep.version,
                            &defaults,
                            now,
                        )
                        .await?;
                    }
                    let account = ActiveAccount {
                        account_id: keep.account_id.clone(),
                        version: keep.version,
                    };
                    Ok((Some(account), demoted, purged, resynced))
                })
            })
            .await?;

        if demoted > 0 || purged > 0 || resynced {
            warn!(
                tenant_id,
                brand_id,
                platform = platform.as_str(),
                account_id = account.as_ref().map(|a| a.account_id.as_str()),
                demoted,
                purged,
                resynced,
                "Reconciled platform binding"
            );
            self.invalidator
                .invalidate_brand(tenant_id, brand_id, "binding_reconcile")
                .await;
        } else {
            debug!(
                tenant_id,
                brand_id,
                platform = platform.as_str(),
                "Canonical binding confirmed"
            );
        }
        Ok(account)
    }

    /// Make `account_id` the only ACTIVE binding for the tuple
    ///
    /// Facts (and coverage) of every other account of the platform are purged
    /// in the same transaction. Repeating the call with the current account
    /// only refreshes its timestamp.
    pub async fn set_active_account(
        &self,
        tenant_id: &str,
        brand_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<BindingChange> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(ReportingError::validation("Account id must not be empty"));
        }
        if brand_id.trim().is_empty() {
            return Err(ReportingError::validation("Brand id must not be empty"));
        }

        let now = self.clock.now();
        let defaults = self.defaults.clone();
        let (t, b, a) = (
            tenant_id.to_string(),
            brand_id.to_string(),
            account_id.to_string(),
        );

        let change = self
            .storage
            .with_brand_lock(tenant_id, brand_id, move |txn| {
                Box::pin(async move {
                    let active = bindings::active_bindings_in(txn, &t, &b, platform).await?;
                    if let [current] = active.as_slice() {
                        if current.account_id == a {
                            bindings::touch_in(txn, current.id, now).await?;
                            let mut binding = current.clone();
                            binding.updated_at = now;
                            return Ok(BindingChange {
                                binding,
                                changed: false,
                            });
                        }
                    }

                    bindings::demote_active_in(txn, &t, &b, platform, None, now).await?;
                    let binding = bindings::activate_in(txn, &t, &b, platform, &a, now).await?;
                    facts::purge_other_accounts_in(txn, &t, &b, platform, Some(&a)).await?;
                    if platform == Platform::Ga4 {
                        settings::set_property_in(
                            txn,
                            &t,
                            &b,
                            Some(&a),
                            binding.version,
                            &defaults,
                            now,
                        )
                        .await?;
                    }
                    Ok(BindingChange {
                        binding,
                        changed: true,
                    })
                })
            })
            .await?;

        if change.changed {
            info!(
                tenant_id,
                brand_id,
                platform = platform.as_str(),
                account_id,
                version = change.binding.version,
                "Active account switched"
            );
            self.invalidator
                .invalidate_brand(tenant_id, brand_id, "binding_switch")
                .await;
        } else {
            debug!(
                tenant_id,
                brand_id,
                platform = platform.as_str(),
                account_id,
                "Active account unchanged"
            );
        }
        Ok(change)
    }

    /// GA4 settings of a brand, created with defaults on first access
    pub async fn ga4_settings(&self, tenant_id: &str, brand_id: &str) -> Result<Ga4Settings> {
        self.storage
            .ensure_ga4_settings(tenant_id, brand_id, &self.defaults, self.clock.now())
            .await
    }

    pub async fn update_ga4_settings(
        &self,
        tenant_id: &str,
        brand_id: &str,
        patch: Ga4SettingsPatch,
    ) -> Result<Ga4Settings> {
        let patch = normalize_patch(patch)?;
        let updated = self
            .storage
            .update_ga4_settings(tenant_id, brand_id, &patch, &self.defaults, self.clock.now())
            .await?;
        self.invalidator
            .invalidate_brand(tenant_id, brand_id, "settings_update")
            .await;
        info!(tenant_id, brand_id, timezone = %updated.timezone, "GA4 settings updated");
        Ok(updated)
    }
}

fn clean_event_names(names: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim().to_string();
        if !name.is_empty() && !cleaned.contains(&name) {
            cleaned.push(name);
        }
    }
    cleaned
}

/// Validate the timezone and tidy the event-name lists
fn normalize_patch(patch: Ga4SettingsPatch) -> Result<Ga4SettingsPatch> {
    let timezone = match patch.timezone {
        Some(tz) => {
            let tz = tz.trim().to_string();
            Tz::from_str(&tz).map_err(|_| {
                ReportingError::validation(format!("'{}' is not an IANA timezone", tz))
            })?;
            Some(tz)
        }
        None => None,
    };
    Ok(Ga4SettingsPatch {
        timezone,
        lead_event_names: patch.lead_event_names.map(clean_event_names),
        conversion_event_names: patch.conversion_event_names.map(clean_event_names),
    })
}
