//! # Settlement Repository
//!
//! Settlement headers and their per-order lines. `settlement_orders.order_id`
//! is UNIQUE, so an order can only ever land in one settlement; a second
//! batch racing for the same order fails on insert and rolls back.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use merchflow_core::money::Money;
use merchflow_core::settlement::{Settlement, SettlementOrder, SettlementPeriod, SettlementStatus};

use super::{bps, new_id, to_rate, to_u32};
use crate::error::DbResult;

#[derive(Debug, Clone, sqlx::FromRow)]
struct SettlementRecord {
    id: String,
    partner_id: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    status: SettlementStatus,
    total_order_value_cents: i64,
    total_earning_cents: i64,
    attempts: i64,
    payout_reference: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct LineRecord {
    order_id: String,
    order_total_cents: i64,
    commission_bps: i64,
    fallback_rate: bool,
    partner_earning_cents: i64,
}

const SELECT_SETTLEMENT: &str = r#"
    SELECT id, partner_id, period_start, period_end, status,
           total_order_value_cents, total_earning_cents, attempts,
           payout_reference, failure_reason, created_at, updated_at
    FROM settlements
"#;

#[derive(Debug, Clone)]
pub struct SettlementRepository {
    pool: SqlitePool,
}

impl SettlementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettlementRepository { pool }
    }

    /// Writes the header and every line. `commission_config_id` is the
    /// config whose tiers produced the rates, if any.
    pub async fn insert_tx(
        &self,
        conn: &mut SqliteConnection,
        settlement: &Settlement,
        commission_config_id: Option<&str>,
    ) -> DbResult<()> {
        debug!(
            settlement_id = %settlement.id,
            partner_id = %settlement.partner_id,
            orders = settlement.orders.len(),
            "Inserting settlement"
        );

        sqlx::query(
            r#"
            INSERT INTO settlements (
                id, partner_id, period_start, period_end, status, commission_config_id,
                total_order_value_cents, total_earning_cents, attempts,
                payout_reference, failure_reason, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&settlement.id)
        .bind(&settlement.partner_id)
        .bind(settlement.period.start)
        .bind(settlement.period.end)
        .bind(settlement.status)
        .bind(commission_config_id)
        .bind(settlement.total_order_value.to_cents())
        .bind(settlement.total_earning.to_cents())
        .bind(i64::from(settlement.attempts))
        .bind(&settlement.payout_reference)
        .bind(&settlement.failure_reason)
        .bind(settlement.created_at)
        .bind(settlement.updated_at)
        .execute(&mut *conn)
        .await?;

        for line in &settlement.orders {
            sqlx::query(
                r#"
                INSERT INTO settlement_orders (
                    id, settlement_id, order_id, order_total_cents,
                    commission_bps, fallback_rate, partner_earning_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(new_id())
            .bind(&settlement.id)
            .bind(&line.order_id)
            .bind(line.order_total.to_cents())
            .bind(bps(line.commission_rate))
            .bind(line.fallback_rate)
            .bind(line.partner_earning.to_cents())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Settlement>> {
        let mut conn = self.pool.acquire().await?;
        self.get_tx(&mut conn, id).await
    }

    pub async fn get_tx(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Settlement>> {
        let record: Option<SettlementRecord> =
            sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_SETTLEMENT))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        match record {
            Some(record) => Ok(Some(hydrate(conn, record).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_for_partner(&self, partner_id: &str) -> DbResult<Vec<Settlement>> {
        self.list_where("WHERE partner_id = ?1 ORDER BY period_start DESC", partner_id)
            .await
    }

    pub async fn list_by_status(&self, status: SettlementStatus) -> DbResult<Vec<Settlement>> {
        let status = match status {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Processing => "processing",
            SettlementStatus::Completed => "completed",
            SettlementStatus::Failed => "failed",
        };
        self.list_where("WHERE status = ?1 ORDER BY updated_at", status).await
    }

    async fn list_where(&self, clause: &str, key: &str) -> DbResult<Vec<Settlement>> {
        let mut conn = self.pool.acquire().await?;
        let records: Vec<SettlementRecord> = sqlx::query_as(&format!("{} {}", SELECT_SETTLEMENT, clause))
            .bind(key)
            .fetch_all(&mut *conn)
            .await?;

        let mut settlements = Vec::with_capacity(records.len());
        for record in records {
            settlements.push(hydrate(&mut conn, record).await?);
        }
        Ok(settlements)
    }

    /// Moves `id` from `from` to PROCESSING and counts the attempt.
    pub async fn begin_processing_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        from: SettlementStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE settlements
            SET status = 'processing', attempts = attempts + 1, updated_at = ?1
            WHERE id = ?2 AND status = ?3
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(from)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// PROCESSING → COMPLETED with the payout reference.
    pub async fn complete_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        payout_reference: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE settlements
            SET status = 'completed', payout_reference = ?1, failure_reason = NULL, updated_at = ?2
            WHERE id = ?3 AND status = 'processing'
            "#,
        )
        .bind(payout_reference)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// PROCESSING → FAILED with the payout error.
    pub async fn fail_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE settlements
            SET status = 'failed', failure_reason = ?1, updated_at = ?2
            WHERE id = ?3 AND status = 'processing'
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// PROCESSING rows not touched since `before` → FAILED.
    ///
    /// The attempt was already counted when the row entered PROCESSING.
    pub async fn fail_stale_processing_tx(
        &self,
        conn: &mut SqliteConnection,
        before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE settlements
            SET status = 'failed', failure_reason = ?1, updated_at = ?2
            WHERE status = 'processing' AND updated_at < ?3
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(before)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn hydrate(conn: &mut SqliteConnection, record: SettlementRecord) -> DbResult<Settlement> {
    let lines: Vec<LineRecord> = sqlx::query_as(
        r#"
        SELECT order_id, order_total_cents, commission_bps, fallback_rate, partner_earning_cents
        FROM settlement_orders
        WHERE settlement_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(&record.id)
    .fetch_all(&mut *conn)
    .await?;

    let orders = lines
        .into_iter()
        .map(|l| {
            Ok(SettlementOrder {
                commission_rate: to_rate("SettlementOrder", &l.order_id, l.commission_bps)?,
                order_id: l.order_id,
                order_total: Money::from_cents(l.order_total_cents),
                fallback_rate: l.fallback_rate,
                partner_earning: Money::from_cents(l.partner_earning_cents),
            })
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(Settlement {
        attempts: to_u32("Settlement", &record.id, record.attempts)?,
        id: record.id,
        partner_id: record.partner_id,
        period: SettlementPeriod {
            start: record.period_start,
            end: record.period_end,
        },
        status: record.status,
        total_order_value: Money::from_cents(record.total_order_value_cents),
        total_earning: Money::from_cents(record.total_earning_cents),
        payout_reference: record.payout_reference,
        failure_reason: record.failure_reason,
        orders,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::order::tests::order;
    use crate::repository::test_support::db;
    use chrono::Duration;
    use merchflow_core::money::Rate;

    fn settlement(partner_id: &str, order_ids: &[&str]) -> Settlement {
        let now = Utc::now();
        let orders: Vec<SettlementOrder> = order_ids
            .iter()
            .map(|id| SettlementOrder {
                order_id: id.to_string(),
                order_total: Money::from_major(1000),
                commission_rate: Rate::from_percent(12),
                fallback_rate: false,
                partner_earning: Money::from_major(880),
            })
            .collect();
        Settlement {
            id: new_id(),
            partner_id: partner_id.into(),
            period: SettlementPeriod::new(now - Duration::days(7), now).unwrap(),
            status: SettlementStatus::Pending,
            total_order_value: Money::from_major(1000) * orders.len() as u32,
            total_earning: Money::from_major(880) * orders.len() as u32,
            attempts: 0,
            payout_reference: None,
            failure_reason: None,
            orders,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_order_settles_once() {
        let db = db().await;
        let o = order("user-1", "partner-1", 1000);
        let mut tx = db.begin_write().await.unwrap();
        db.orders().insert_tx(&mut tx, &o).await.unwrap();
        db.settlements()
            .insert_tx(&mut tx, &settlement("partner-1", &[&o.id]), None)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin_write().await.unwrap();
        let second = db
            .settlements()
            .insert_tx(&mut tx, &settlement("partner-1", &[&o.id]), None)
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_status_flow_counts_attempts() {
        let db = db().await;
        let o = order("user-1", "partner-1", 1000);
        let s = settlement("partner-1", &[&o.id]);
        let repo = db.settlements();
        let now = Utc::now();

        let mut tx = db.begin_write().await.unwrap();
        db.orders().insert_tx(&mut tx, &o).await.unwrap();
        repo.insert_tx(&mut tx, &s, None).await.unwrap();
        assert!(repo
            .begin_processing_tx(&mut tx, &s.id, SettlementStatus::Pending, now)
            .await
            .unwrap());
        assert!(repo.fail_tx(&mut tx, &s.id, "bank timeout", now).await.unwrap());
        assert!(repo
            .begin_processing_tx(&mut tx, &s.id, SettlementStatus::Failed, now)
            .await
            .unwrap());
        assert!(repo.complete_tx(&mut tx, &s.id, "UTR-1", now).await.unwrap());
        assert!(!repo.complete_tx(&mut tx, &s.id, "UTR-2", now).await.unwrap());
        tx.commit().await.unwrap();

        let loaded = repo.get(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SettlementStatus::Completed);
        assert_eq!(loaded.attempts, 2);
        assert_eq!(loaded.payout_reference.as_deref(), Some("UTR-1"));
        assert!(loaded.failure_reason.is_none());
        assert_eq!(loaded.orders.len(), 1);
        assert_eq!(repo.list_for_partner("partner-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_processing_is_failed() {
        let db = db().await;
        let o = order("user-1", "partner-1", 1000);
        let s = settlement("partner-1", &[&o.id]);
        let repo = db.settlements();
        let started = Utc::now() - Duration::hours(2);

        let mut tx = db.begin_write().await.unwrap();
        db.orders().insert_tx(&mut tx, &o).await.unwrap();
        repo.insert_tx(&mut tx, &s, None).await.unwrap();
        assert!(repo
            .begin_processing_tx(&mut tx, &s.id, SettlementStatus::Pending, started)
            .await
            .unwrap());

        let cutoff = Utc::now() - Duration::hours(3);
        assert_eq!(repo.fail_stale_processing_tx(&mut tx, cutoff, "interrupted", Utc::now()).await.unwrap(), 0);
        let cutoff = Utc::now() - Duration::hours(1);
        assert_eq!(repo.fail_stale_processing_tx(&mut tx, cutoff, "interrupted", Utc::now()).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let loaded = repo.get(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SettlementStatus::Failed);
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.failure_reason.as_deref(), Some("interrupted"));
    }
}
