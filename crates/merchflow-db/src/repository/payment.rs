//! # Payment Repository
//!
//! Gateway payment intents. A payment is created with the order and is
//! either captured once or expired by the sweeper.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use merchflow_core::money::Money;
use merchflow_core::order::{Payment, PaymentStatus};

use crate::error::DbResult;

#[derive(Debug, Clone, sqlx::FromRow)]
struct PaymentRecord {
    id: String,
    order_id: String,
    gateway_order_id: String,
    gateway_payment_id: Option<String>,
    amount_cents: i64,
    status: PaymentStatus,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    captured_at: Option<DateTime<Utc>>,
}

impl From<PaymentRecord> for Payment {
    fn from(r: PaymentRecord) -> Self {
        Payment {
            id: r.id,
            order_id: r.order_id,
            gateway_order_id: r.gateway_order_id,
            gateway_payment_id: r.gateway_payment_id,
            amount: Money::from_cents(r.amount_cents),
            status: r.status,
            expires_at: r.expires_at,
            created_at: r.created_at,
            captured_at: r.captured_at,
        }
    }
}

const SELECT_PAYMENT: &str = r#"
    SELECT id, order_id, gateway_order_id, gateway_payment_id, amount_cents,
           status, expires_at, created_at, captured_at
    FROM payments
"#;

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    pub async fn insert_tx(&self, conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_id, gateway_order_id, gateway_payment_id, amount_cents,
                status, expires_at, created_at, captured_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.order_id)
        .bind(&payment.gateway_order_id)
        .bind(&payment.gateway_payment_id)
        .bind(payment.amount.to_cents())
        .bind(payment.status)
        .bind(payment.expires_at)
        .bind(payment.created_at)
        .bind(payment.captured_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get_by_gateway_order_id_tx(
        &self,
        conn: &mut SqliteConnection,
        gateway_order_id: &str,
    ) -> DbResult<Option<Payment>> {
        let record: Option<PaymentRecord> =
            sqlx::query_as(&format!("{} WHERE gateway_order_id = ?1", SELECT_PAYMENT))
                .bind(gateway_order_id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(record.map(Payment::from))
    }

    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<Payment>> {
        let records: Vec<PaymentRecord> =
            sqlx::query_as(&format!("{} WHERE order_id = ?1 ORDER BY created_at", SELECT_PAYMENT))
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(records.into_iter().map(Payment::from).collect())
    }

    /// The captured payment of an order, if any.
    pub async fn captured_for_order_tx(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> DbResult<Option<Payment>> {
        let record: Option<PaymentRecord> = sqlx::query_as(&format!(
            "{} WHERE order_id = ?1 AND status = 'captured'",
            SELECT_PAYMENT
        ))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(record.map(Payment::from))
    }

    /// CREATED → CAPTURED. False when the payment was no longer CREATED.
    pub async fn capture_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        gateway_payment_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'captured', gateway_payment_id = ?1, captured_at = ?2
            WHERE id = ?3 AND status = 'created'
            "#,
        )
        .bind(gateway_payment_id)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// CREATED payments whose window closed before `now`, oldest first.
    pub async fn list_expired(&self, now: DateTime<Utc>, limit: u32) -> DbResult<Vec<Payment>> {
        let records: Vec<PaymentRecord> = sqlx::query_as(&format!(
            "{} WHERE status = 'created' AND expires_at < ?1 ORDER BY expires_at LIMIT ?2",
            SELECT_PAYMENT
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(Payment::from).collect())
    }

    /// CREATED → EXPIRED. False when a capture got there first.
    pub async fn expire_tx(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query("UPDATE payments SET status = 'expired' WHERE id = ?1 AND status = 'created'")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
