//! # Discount Repository
//!
//! Discount rows, their status transitions and discount limits.
//!
//! Status updates are conditional on the expected current status, so two
//! operators acting on the same discount cannot both succeed.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use merchflow_core::discount::{Discount, DiscountLimit, DiscountStatus, DiscountWindow};

use super::{bps, new_id, to_rate};
use crate::error::DbResult;

#[derive(Debug, Clone, sqlx::FromRow)]
struct DiscountRecord {
    id: String,
    product_id: String,
    partner_id: String,
    rate_bps: i64,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    status: DiscountStatus,
    terms_accepted: bool,
    reviewed_by: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DiscountRecord {
    fn into_discount(self) -> DbResult<Discount> {
        Ok(Discount {
            rate: to_rate("Discount", &self.id, self.rate_bps)?,
            id: self.id,
            product_id: self.product_id,
            partner_id: self.partner_id,
            window: DiscountWindow::new(self.starts_at, self.ends_at),
            status: self.status,
            terms_accepted: self.terms_accepted,
            reviewed_by: self.reviewed_by,
            reviewed_at: self.reviewed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct LimitRecord {
    id: String,
    category: Option<String>,
    min_bps: i64,
    max_bps: i64,
}

const SELECT_DISCOUNT: &str = r#"
    SELECT id, product_id, partner_id, rate_bps, starts_at, ends_at, status,
           terms_accepted, reviewed_by, reviewed_at, created_at, updated_at
    FROM discounts
"#;

fn convert(records: Vec<DiscountRecord>) -> DbResult<Vec<Discount>> {
    records.into_iter().map(DiscountRecord::into_discount).collect()
}

#[derive(Debug, Clone)]
pub struct DiscountRepository {
    pool: SqlitePool,
}

impl DiscountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DiscountRepository { pool }
    }

    pub async fn insert(&self, discount: &Discount) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        self.insert_tx(&mut conn, discount).await
    }

    pub async fn insert_tx(&self, conn: &mut SqliteConnection, discount: &Discount) -> DbResult<()> {
        debug!(discount_id = %discount.id, product_id = %discount.product_id, "Inserting discount");

        sqlx::query(
            r#"
            INSERT INTO discounts (
                id, product_id, partner_id, rate_bps, starts_at, ends_at, status,
                terms_accepted, reviewed_by, reviewed_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&discount.id)
        .bind(&discount.product_id)
        .bind(&discount.partner_id)
        .bind(bps(discount.rate))
        .bind(discount.window.starts_at)
        .bind(discount.window.ends_at)
        .bind(discount.status)
        .bind(discount.terms_accepted)
        .bind(&discount.reviewed_by)
        .bind(discount.reviewed_at)
        .bind(discount.created_at)
        .bind(discount.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Discount>> {
        let mut conn = self.pool.acquire().await?;
        self.get_tx(&mut conn, id).await
    }

    pub async fn get_tx(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Discount>> {
        let record: Option<DiscountRecord> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_DISCOUNT))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        record.map(DiscountRecord::into_discount).transpose()
    }

    /// Every discount for a product, any status.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<Discount>> {
        let mut conn = self.pool.acquire().await?;
        self.list_for_product_tx(&mut conn, product_id).await
    }

    pub async fn list_for_product_tx(&self, conn: &mut SqliteConnection, product_id: &str) -> DbResult<Vec<Discount>> {
        let records: Vec<DiscountRecord> = sqlx::query_as(&format!(
            "{} WHERE product_id = ?1 ORDER BY created_at DESC",
            SELECT_DISCOUNT
        ))
        .bind(product_id)
        .fetch_all(&mut *conn)
        .await?;
        convert(records)
    }

    /// APPROVED discounts for a product; the caller checks windows.
    pub async fn list_approved(&self, product_id: &str) -> DbResult<Vec<Discount>> {
        let records: Vec<DiscountRecord> = sqlx::query_as(&format!(
            "{} WHERE product_id = ?1 AND status = 'approved' ORDER BY created_at DESC",
            SELECT_DISCOUNT
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        convert(records)
    }

    pub async fn list_by_status(&self, status: DiscountStatus) -> DbResult<Vec<Discount>> {
        let records: Vec<DiscountRecord> =
            sqlx::query_as(&format!("{} WHERE status = ?1 ORDER BY created_at", SELECT_DISCOUNT))
                .bind(status)
                .fetch_all(&self.pool)
                .await?;
        convert(records)
    }

    pub async fn list_for_partner(&self, partner_id: &str) -> DbResult<Vec<Discount>> {
        let records: Vec<DiscountRecord> = sqlx::query_as(&format!(
            "{} WHERE partner_id = ?1 ORDER BY created_at DESC",
            SELECT_DISCOUNT
        ))
        .bind(partner_id)
        .fetch_all(&self.pool)
        .await?;
        convert(records)
    }

    /// Moves `id` from `expected` to `next`. Returns false when the row was
    /// no longer in `expected`.
    pub async fn update_status_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        expected: DiscountStatus,
        next: DiscountStatus,
        reviewer: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE discounts
            SET status = ?1, reviewed_by = ?2, reviewed_at = ?3, updated_at = ?3
            WHERE id = ?4 AND status = ?5
            "#,
        )
        .bind(next)
        .bind(reviewer)
        .bind(now)
        .bind(id)
        .bind(expected)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Limits
    // =========================================================================

    pub async fn list_limits(&self) -> DbResult<Vec<DiscountLimit>> {
        let records: Vec<LimitRecord> =
            sqlx::query_as("SELECT id, category, min_bps, max_bps FROM discount_limits")
                .fetch_all(&self.pool)
                .await?;
        records
            .into_iter()
            .map(|r| {
                Ok(DiscountLimit {
                    min: to_rate("DiscountLimit", &r.id, r.min_bps)?,
                    max: to_rate("DiscountLimit", &r.id, r.max_bps)?,
                    category: r.category,
                })
            })
            .collect()
    }

    /// Inserts or replaces the limit for its category (or the global one).
    pub async fn upsert_limit(&self, limit: &DiscountLimit) -> DbResult<()> {
        let mut tx = crate::pool::begin_write_on(&self.pool).await?;
        self.upsert_limit_tx(&mut tx, limit).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_limit_tx(&self, conn: &mut SqliteConnection, limit: &DiscountLimit) -> DbResult<()> {
        sqlx::query("DELETE FROM discount_limits WHERE COALESCE(category, '') = COALESCE(?1, '')")
            .bind(&limit.category)
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            "INSERT INTO discount_limits (id, category, min_bps, max_bps, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(new_id())
        .bind(&limit.category)
        .bind(bps(limit.min))
        .bind(bps(limit.max))
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::db;
    use merchflow_core::money::Rate;

    fn discount(product_id: &str) -> Discount {
        let now = Utc::now();
        Discount {
            id: new_id(),
            product_id: product_id.into(),
            partner_id: "partner-1".into(),
            rate: Rate::from_percent(10),
            window: DiscountWindow::always(),
            status: DiscountStatus::Pending,
            terms_accepted: true,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_conditional_status_update() {
        let db = db().await;
        let repo = db.discounts();
        let d = discount("tee");
        repo.insert(&d).await.unwrap();

        let mut tx = db.begin_write().await.unwrap();
        let moved = repo
            .update_status_tx(&mut tx, &d.id, DiscountStatus::Pending, DiscountStatus::Approved, "operator:ops", Utc::now())
            .await
            .unwrap();
        assert!(moved);
        let again = repo
            .update_status_tx(&mut tx, &d.id, DiscountStatus::Pending, DiscountStatus::Approved, "operator:ops", Utc::now())
            .await
            .unwrap();
        assert!(!again);
        tx.commit().await.unwrap();

        let approved = repo.list_approved("tee").await.unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].reviewed_by.as_deref(), Some("operator:ops"));
    }

    #[tokio::test]
    async fn test_limit_upsert_replaces() {
        let db = db().await;
        let repo = db.discounts();
        let mut limit = DiscountLimit {
            category: Some("apparel".into()),
            min: Rate::from_percent(5),
            max: Rate::from_percent(30),
        };
        repo.upsert_limit(&limit).await.unwrap();
        limit.max = Rate::from_percent(25);
        repo.upsert_limit(&limit).await.unwrap();
        repo.upsert_limit(&DiscountLimit {
            category: None,
            min: Rate::from_percent(1),
            max: Rate::from_percent(40),
        })
        .await
        .unwrap();

        let limits = repo.list_limits().await.unwrap();
        assert_eq!(limits.len(), 2);
        assert!(limits.contains(&limit));
    }
}
