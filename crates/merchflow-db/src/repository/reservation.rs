//! # Reservation Repository
//!
//! Stock held for unpaid orders of inventory-tracked products.
//!
//! ```text
//! checkout ──► ACTIVE ──┬── payment captured ──► CONSUMED (stock decremented)
//!                       │                              │
//!                       │                     paid order cancelled
//!                       │                              ▼
//!                       └── expired/cancelled ─► RELEASED (stock restored if it was consumed)
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::new_id;
use crate::error::DbResult;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StockReservation {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    pub async fn reserve_tx(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO stock_reservations (id, order_id, product_id, quantity, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)
            "#,
        )
        .bind(new_id())
        .bind(order_id)
        .bind(product_id)
        .bind(i64::from(quantity))
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Returns held stock to the pool.
    pub async fn release_for_order_tx(&self, conn: &mut SqliteConnection, order_id: &str) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE stock_reservations SET status = 'released', updated_at = ?1 WHERE order_id = ?2 AND status = 'active'",
        )
        .bind(Utc::now())
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Turns active reservations into a real stock decrement.
    pub async fn consume_for_order_tx(&self, conn: &mut SqliteConnection, order_id: &str) -> DbResult<u64> {
        sqlx::query(
            r#"
            UPDATE products
            SET stock = stock - (
                SELECT SUM(r.quantity) FROM stock_reservations r
                WHERE r.order_id = ?1 AND r.product_id = products.id AND r.status = 'active'
            )
            WHERE id IN (
                SELECT product_id FROM stock_reservations WHERE order_id = ?1 AND status = 'active'
            )
            AND track_inventory = 1
            "#,
        )
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

        let result = sqlx::query(
            "UPDATE stock_reservations SET status = 'consumed', updated_at = ?1 WHERE order_id = ?2 AND status = 'active'",
        )
        .bind(Utc::now())
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Gives consumed stock back after a paid order is cancelled.
    pub async fn restock_for_order_tx(&self, conn: &mut SqliteConnection, order_id: &str) -> DbResult<u64> {
        sqlx::query(
            r#"
            UPDATE products
            SET stock = stock + (
                SELECT SUM(r.quantity) FROM stock_reservations r
                WHERE r.order_id = ?1 AND r.product_id = products.id AND r.status = 'consumed'
            )
            WHERE id IN (
                SELECT product_id FROM stock_reservations WHERE order_id = ?1 AND status = 'consumed'
            )
            AND track_inventory = 1
            "#,
        )
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

        let result = sqlx::query(
            "UPDATE stock_reservations SET status = 'released', updated_at = ?1 WHERE order_id = ?2 AND status = 'consumed'",
        )
        .bind(Utc::now())
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<StockReservation>> {
        let rows = sqlx::query_as(
            "SELECT id, order_id, product_id, quantity, status FROM stock_reservations WHERE order_id = ?1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::order::tests::order;
    use crate::repository::test_support::{db, product};

    #[tokio::test]
    async fn test_reserve_consume_and_release() {
        let db = db().await;
        let mut mug = product("mug", "partner-1");
        mug.track_inventory = true;
        mug.stock = Some(50);
        db.catalog().upsert(&mug).await.unwrap();

        let paid = order("user-1", "partner-1", 500);
        let unpaid = order("user-1", "partner-1", 500);
        let repo = db.reservations();

        let mut tx = db.begin_write().await.unwrap();
        db.orders().insert_tx(&mut tx, &paid).await.unwrap();
        db.orders().insert_tx(&mut tx, &unpaid).await.unwrap();
        repo.reserve_tx(&mut tx, &paid.id, "mug", 10).await.unwrap();
        repo.reserve_tx(&mut tx, &unpaid.id, "mug", 15).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(db.catalog().available_stock("mug").await.unwrap(), Some(25));

        let mut tx = db.begin_write().await.unwrap();
        assert_eq!(repo.consume_for_order_tx(&mut tx, &paid.id).await.unwrap(), 1);
        assert_eq!(repo.release_for_order_tx(&mut tx, &unpaid.id).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let mug = db.catalog().get("mug").await.unwrap().unwrap();
        assert_eq!(mug.stock, Some(40));
        assert_eq!(db.catalog().available_stock("mug").await.unwrap(), Some(40));
        assert_eq!(repo.list_for_order(&unpaid.id).await.unwrap()[0].status, "released");
    }

    #[tokio::test]
    async fn test_restock_returns_consumed_stock_once() {
        let db = db().await;
        let mut mug = product("mug", "partner-1");
        mug.track_inventory = true;
        mug.stock = Some(20);
        db.catalog().upsert(&mug).await.unwrap();

        let paid = order("user-1", "partner-1", 500);
        let repo = db.reservations();

        let mut tx = db.begin_write().await.unwrap();
        db.orders().insert_tx(&mut tx, &paid).await.unwrap();
        repo.reserve_tx(&mut tx, &paid.id, "mug", 2).await.unwrap();
        repo.consume_for_order_tx(&mut tx, &paid.id).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(db.catalog().get("mug").await.unwrap().unwrap().stock, Some(18));

        let mut tx = db.begin_write().await.unwrap();
        assert_eq!(repo.restock_for_order_tx(&mut tx, &paid.id).await.unwrap(), 1);
        assert_eq!(repo.restock_for_order_tx(&mut tx, &paid.id).await.unwrap(), 0);
        tx.commit().await.unwrap();

        assert_eq!(db.catalog().get("mug").await.unwrap().unwrap().stock, Some(20));
        assert_eq!(db.catalog().available_stock("mug").await.unwrap(), Some(20));
        assert_eq!(repo.list_for_order(&paid.id).await.unwrap()[0].status, "released");
    }
}
