//! # Partner Repository
//!
//! Fulfilment partners and the categories they produce.
//!
//! `list_for_category` returns active partners by ascending priority,
//! which is the order automatic reassignment walks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::pool::begin_write_on;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Partner {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PartnerRepository {
    pool: SqlitePool,
}

impl PartnerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PartnerRepository { pool }
    }

    /// Registers a partner and replaces its categories.
    ///
    /// `categories` are `(category, priority)` pairs; lower priority is
    /// offered orders first.
    pub async fn upsert(&self, partner: &Partner, categories: &[(String, i64)]) -> DbResult<()> {
        debug!(partner_id = %partner.id, categories = categories.len(), "Upserting partner");

        let mut tx = begin_write_on(&self.pool).await?;

        sqlx::query(
            r#"
            INSERT INTO partners (id, name, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, is_active = excluded.is_active
            "#,
        )
        .bind(&partner.id)
        .bind(&partner.name)
        .bind(partner.is_active)
        .bind(partner.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM partner_categories WHERE partner_id = ?1")
            .bind(&partner.id)
            .execute(&mut *tx)
            .await?;

        for (category, priority) in categories {
            sqlx::query(
                "INSERT INTO partner_categories (partner_id, category, priority) VALUES (?1, ?2, ?3)",
            )
            .bind(&partner.id)
            .bind(category)
            .bind(priority)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Partner>> {
        let partner = sqlx::query_as(
            "SELECT id, name, is_active, created_at FROM partners WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(partner)
    }

    /// Active partner ids serving `category`, best first.
    pub async fn list_for_category(&self, category: &str) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT p.id
            FROM partners p
            JOIN partner_categories c ON c.partner_id = p.id
            WHERE c.category = ?1 AND p.is_active = 1
            ORDER BY c.priority, p.id
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
