//! # Commission Repository
//!
//! Commission configs and their tiers.
//!
//! ## Default Swap
//! ```text
//! BEGIN (write lock held)
//!   UPDATE ... SET is_default = 0 WHERE is_default = 1 AND id <> :new
//!   UPDATE ... SET is_default = 1, is_active = 1 WHERE id = :new
//! COMMIT
//! ```
//! Both statements share one transaction and the partial unique index on
//! `is_default = 1` rejects a second default, so readers see exactly one.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use merchflow_core::commission::{CommissionConfig, CommissionTier};
use merchflow_core::money::Money;

use super::{bps, new_id, to_rate, to_u32};
use crate::error::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct ConfigRecord {
    id: String,
    name: String,
    version: i64,
    is_default: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TierRecord {
    min_value_cents: i64,
    max_value_cents: Option<i64>,
    rate_bps: i64,
    display_order: i64,
}

const SELECT_CONFIG: &str = r#"
    SELECT id, name, version, is_default, is_active, created_at, updated_at
    FROM commission_configs
"#;

#[derive(Debug, Clone)]
pub struct CommissionRepository {
    pool: SqlitePool,
}

impl CommissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CommissionRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<CommissionConfig>> {
        let mut conn = self.pool.acquire().await?;
        self.get_tx(&mut conn, id).await
    }

    pub async fn get_tx(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<CommissionConfig>> {
        let record: Option<ConfigRecord> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_CONFIG))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match record {
            Some(record) => Ok(Some(load_tiers(conn, record).await?)),
            None => Ok(None),
        }
    }

    /// The active default config, if one exists.
    pub async fn default_active(&self) -> DbResult<Option<CommissionConfig>> {
        let mut conn = self.pool.acquire().await?;
        self.default_active_tx(&mut conn).await
    }

    pub async fn default_active_tx(&self, conn: &mut SqliteConnection) -> DbResult<Option<CommissionConfig>> {
        let record: Option<ConfigRecord> = sqlx::query_as(&format!(
            "{} WHERE is_default = 1 AND is_active = 1",
            SELECT_CONFIG
        ))
        .fetch_optional(&mut *conn)
        .await?;
        match record {
            Some(record) => Ok(Some(load_tiers(conn, record).await?)),
            None => Ok(None),
        }
    }

    /// Highest version of the config called `name`.
    pub async fn latest_by_name_tx(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> DbResult<Option<CommissionConfig>> {
        let record: Option<ConfigRecord> = sqlx::query_as(&format!(
            "{} WHERE name = ?1 ORDER BY version DESC LIMIT 1",
            SELECT_CONFIG
        ))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
        match record {
            Some(record) => Ok(Some(load_tiers(conn, record).await?)),
            None => Ok(None),
        }
    }

    /// All configs, newest version first within each name.
    pub async fn list(&self) -> DbResult<Vec<CommissionConfig>> {
        let mut conn = self.pool.acquire().await?;
        let records: Vec<ConfigRecord> =
            sqlx::query_as(&format!("{} ORDER BY name, version DESC", SELECT_CONFIG))
                .fetch_all(&mut *conn)
                .await?;
        let mut configs = Vec::with_capacity(records.len());
        for record in records {
            configs.push(load_tiers(&mut conn, record).await?);
        }
        Ok(configs)
    }

    /// Inserts the config header and its tiers. `is_default` is written as
    /// false; use `set_default_tx` to promote it.
    pub async fn insert_tx(&self, conn: &mut SqliteConnection, config: &CommissionConfig) -> DbResult<()> {
        debug!(config_id = %config.id, name = %config.name, version = config.version, "Inserting commission config");

        sqlx::query(
            r#"
            INSERT INTO commission_configs (id, name, version, is_default, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)
            "#,
        )
        .bind(&config.id)
        .bind(&config.name)
        .bind(i64::from(config.version))
        .bind(config.is_active)
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&mut *conn)
        .await?;

        insert_tiers(conn, &config.id, &config.tiers).await
    }

    /// Clear-and-rebuild of an unreferenced config's tiers.
    pub async fn replace_tiers_tx(
        &self,
        conn: &mut SqliteConnection,
        config_id: &str,
        tiers: &[CommissionTier],
    ) -> DbResult<()> {
        sqlx::query("DELETE FROM commission_tiers WHERE config_id = ?1")
            .bind(config_id)
            .execute(&mut *conn)
            .await?;

        insert_tiers(conn, config_id, tiers).await?;

        sqlx::query("UPDATE commission_configs SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(config_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// True when any settlement was computed with this config.
    pub async fn is_referenced_tx(&self, conn: &mut SqliteConnection, config_id: &str) -> DbResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM settlements WHERE commission_config_id = ?1")
                .bind(config_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count > 0)
    }

    /// Makes `config_id` the only default and the only active version of
    /// its name. Must run in a write transaction.
    pub async fn set_default_tx(&self, conn: &mut SqliteConnection, config_id: &str) -> DbResult<()> {
        let now = Utc::now();
        let name: String = sqlx::query_scalar("SELECT name FROM commission_configs WHERE id = ?1")
            .bind(config_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("CommissionConfig", config_id))?;
        let retired = self.deactivate_other_versions_tx(conn, &name, config_id).await?;

        let cleared = sqlx::query(
            "UPDATE commission_configs SET is_default = 0, updated_at = ?1 WHERE is_default = 1 AND id <> ?2",
        )
        .bind(now)
        .bind(config_id)
        .execute(&mut *conn)
        .await?;

        let promoted = sqlx::query(
            "UPDATE commission_configs SET is_default = 1, is_active = 1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(now)
        .bind(config_id)
        .execute(&mut *conn)
        .await?;

        if promoted.rows_affected() == 0 {
            return Err(DbError::not_found("CommissionConfig", config_id));
        }

        info!(
            config_id = %config_id,
            previous_defaults = cleared.rows_affected(),
            retired_versions = retired,
            "Default commission config switched"
        );
        Ok(())
    }

    /// Deactivates every other version of `name`.
    pub async fn deactivate_other_versions_tx(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
        keep_id: &str,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE commission_configs
            SET is_active = 0, is_default = 0, updated_at = ?1
            WHERE name = ?2 AND id <> ?3 AND is_active = 1
            "#,
        )
        .bind(Utc::now())
        .bind(name)
        .bind(keep_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_tiers(conn: &mut SqliteConnection, config_id: &str, tiers: &[CommissionTier]) -> DbResult<()> {
    for tier in tiers {
        sqlx::query(
            r#"
            INSERT INTO commission_tiers (id, config_id, min_value_cents, max_value_cents, rate_bps, display_order)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(new_id())
        .bind(config_id)
        .bind(tier.min_order_value.to_cents())
        .bind(tier.max_order_value.map(|m| m.to_cents()))
        .bind(bps(tier.rate))
        .bind(i64::from(tier.display_order))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn load_tiers(conn: &mut SqliteConnection, record: ConfigRecord) -> DbResult<CommissionConfig> {
    let rows: Vec<TierRecord> = sqlx::query_as(
        r#"
        SELECT min_value_cents, max_value_cents, rate_bps, display_order
        FROM commission_tiers
        WHERE config_id = ?1
        ORDER BY min_value_cents
        "#,
    )
    .bind(&record.id)
    .fetch_all(&mut *conn)
    .await?;

    let tiers = rows
        .into_iter()
        .map(|t| {
            Ok(CommissionTier::new(
                Money::from_cents(t.min_value_cents),
                t.max_value_cents.map(Money::from_cents),
                to_rate("CommissionTier", &record.id, t.rate_bps)?,
                to_u32("CommissionTier", &record.id, t.display_order)?,
            ))
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(CommissionConfig {
        version: to_u32("CommissionConfig", &record.id, record.version)?,
        id: record.id,
        name: record.name,
        is_default: record.is_default,
        is_active: record.is_active,
        tiers,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}
