//! # Commission Resolver
//!
//! Saves versioned commission configs and resolves the rate applied to an
//! order at settlement time.
//!
//! ## Saving a Config
//! ```text
//! save_config(name, tiers, make_default)
//!      │
//!      ├── validate_tier_set ──► INVALID_TIER_SET
//!      │
//!      ▼  (one write transaction)
//! latest version of `name`?
//!      │
//!      ├── none ─────────────────► insert v1
//!      ├── unreferenced ─────────► clear-and-rebuild tiers in place
//!      └── used by a settlement ─► insert v(n+1), deactivate older versions
//!      │
//!      ├── make_default ─────────► swap default flag in the same transaction
//!      ▼
//! audit entry
//! ```

use chrono::Utc;
use tracing::{error, info, warn};

use merchflow_core::commission::{self, CommissionConfig, CommissionTier, ResolvedRate};
use merchflow_core::money::{Money, Rate};
use merchflow_core::types::Actor;
use merchflow_core::validation::validate_name;
use merchflow_db::repository::new_id;
use merchflow_db::Database;

use crate::error::{EngineError, EngineResult};
use crate::{audit_entry, snapshot};

#[derive(Clone)]
pub struct CommissionResolver {
    db: Database,
    fallback: Rate,
}

impl CommissionResolver {
    pub fn new(db: Database, fallback: Rate) -> Self {
        CommissionResolver { db, fallback }
    }

    pub fn fallback_rate(&self) -> Rate {
        self.fallback
    }

    /// Creates or updates the config called `name`.
    pub async fn save_config(
        &self,
        actor: &Actor,
        name: &str,
        tiers: Vec<CommissionTier>,
        make_default: bool,
    ) -> EngineResult<CommissionConfig> {
        validate_name(name)?;
        let tiers = commission::validate_tier_set(&tiers)?;
        let now = Utc::now();
        let repo = self.db.commission();

        let mut tx = self.db.begin_write().await?;
        let existing = repo.latest_by_name_tx(&mut tx, name).await?;
        let referenced = match &existing {
            Some(current) => repo.is_referenced_tx(&mut tx, &current.id).await?,
            None => false,
        };

        let (config_id, make_default) = match &existing {
            None => {
                let config = CommissionConfig {
                    id: new_id(),
                    name: name.to_string(),
                    version: 1,
                    is_default: false,
                    is_active: true,
                    tiers,
                    created_at: now,
                    updated_at: now,
                };
                repo.insert_tx(&mut tx, &config).await?;
                (config.id, make_default)
            }
            Some(current) if referenced => {
                let config = CommissionConfig {
                    id: new_id(),
                    name: name.to_string(),
                    version: current.version + 1,
                    is_default: false,
                    is_active: true,
                    tiers,
                    created_at: now,
                    updated_at: now,
                };
                repo.insert_tx(&mut tx, &config).await?;
                repo.deactivate_other_versions_tx(&mut tx, name, &config.id).await?;
                info!(name = %name, version = config.version, "Referenced commission config versioned");
                // the new version inherits the default flag
                (config.id, make_default || current.is_default)
            }
            Some(current) => {
                repo.replace_tiers_tx(&mut tx, &current.id, &tiers).await?;
                (current.id.clone(), make_default)
            }
        };

        if make_default {
            repo.set_default_tx(&mut tx, &config_id).await?;
        }

        let saved = repo
            .get_tx(&mut tx, &config_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CommissionConfig", config_id.as_str()))?;

        self.db
            .audit()
            .record_tx(
                &mut tx,
                &audit_entry(
                    "commission.save",
                    "commission_config",
                    &saved.id,
                    actor,
                    existing.as_ref().and_then(snapshot),
                    snapshot(&saved),
                    now,
                ),
            )
            .await?;
        tx.commit().await?;

        info!(config_id = %saved.id, name = %saved.name, version = saved.version, is_default = saved.is_default, "Commission config saved");
        Ok(saved)
    }

    /// Makes `config_id` the only default.
    pub async fn set_default(&self, actor: &Actor, config_id: &str) -> EngineResult<CommissionConfig> {
        let repo = self.db.commission();
        let mut tx = self.db.begin_write().await?;

        let before = repo.default_active_tx(&mut tx).await?;
        let target = repo
            .get_tx(&mut tx, config_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CommissionConfig", config_id))?;
        commission::validate_tier_set(&target.tiers)?;

        repo.set_default_tx(&mut tx, config_id).await?;
        let after = repo
            .get_tx(&mut tx, config_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CommissionConfig", config_id))?;

        self.db
            .audit()
            .record_tx(
                &mut tx,
                &audit_entry(
                    "commission.set_default",
                    "commission_config",
                    config_id,
                    actor,
                    before.as_ref().and_then(snapshot),
                    snapshot(&after),
                    Utc::now(),
                ),
            )
            .await?;
        tx.commit().await?;
        Ok(after)
    }

    pub async fn default_config(&self) -> EngineResult<Option<CommissionConfig>> {
        Ok(self.db.commission().default_active().await?)
    }

    pub async fn get(&self, config_id: &str) -> EngineResult<CommissionConfig> {
        self.db
            .commission()
            .get(config_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CommissionConfig", config_id))
    }

    pub async fn list(&self) -> EngineResult<Vec<CommissionConfig>> {
        Ok(self.db.commission().list().await?)
    }

    /// Rate for `amount` under `config`, falling back when nothing matches.
    pub fn resolve_rate(&self, amount: Money, config: Option<&CommissionConfig>) -> ResolvedRate {
        let Some(config) = config else {
            warn!(amount = %amount, fallback = %self.fallback, "No default commission config; using fallback rate");
            return ResolvedRate {
                rate: self.fallback,
                fallback: true,
            };
        };

        let resolved = commission::resolve_rate(amount, &config.tiers, self.fallback);
        if resolved.fallback {
            error!(
                config_id = %config.id,
                amount = %amount,
                fallback = %self.fallback,
                "Commission tiers do not cover amount; using fallback rate"
            );
        }
        resolved
    }
}
