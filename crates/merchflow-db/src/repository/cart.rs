//! # Cart Repository
//!
//! One cart per user. Item operations are always scoped by the cart id of
//! the requesting user, so a foreign item id simply matches nothing.

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use merchflow_core::cart::{Cart, CartItem};
use merchflow_core::money::Money;

use super::{new_id, to_u32};
use crate::error::DbResult;

#[derive(Debug, Clone, sqlx::FromRow)]
struct CartRecord {
    id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct CartItemRecord {
    id: String,
    product_id: String,
    customization_id: Option<String>,
    quantity: i64,
    unit_price_at_add_cents: i64,
    added_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CartItemRecord {
    fn into_item(self) -> DbResult<CartItem> {
        Ok(CartItem {
            quantity: to_u32("CartItem", &self.id, self.quantity)?,
            id: self.id,
            product_id: self.product_id,
            customization_id: self.customization_id,
            unit_price_at_add: Money::from_cents(self.unit_price_at_add_cents),
            added_at: self.added_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    pub async fn get_for_user(&self, user_id: &str) -> DbResult<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        self.get_for_user_tx(&mut conn, user_id).await
    }

    pub async fn get_for_user_tx(&self, conn: &mut SqliteConnection, user_id: &str) -> DbResult<Option<Cart>> {
        let record: Option<CartRecord> =
            sqlx::query_as("SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let items: Vec<CartItemRecord> = sqlx::query_as(
            r#"
            SELECT id, product_id, customization_id, quantity, unit_price_at_add_cents, added_at, updated_at
            FROM cart_items
            WHERE cart_id = ?1
            ORDER BY added_at, id
            "#,
        )
        .bind(&record.id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(Cart {
            id: record.id,
            user_id: record.user_id,
            items: items
                .into_iter()
                .map(CartItemRecord::into_item)
                .collect::<DbResult<Vec<_>>>()?,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }))
    }

    /// Returns the user's cart, creating an empty one if needed.
    pub async fn get_or_create(&self, user_id: &str) -> DbResult<Cart> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO carts (id, user_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let cart = self.get_for_user_tx(&mut conn, user_id).await?;
        cart.ok_or_else(|| crate::error::DbError::not_found("Cart", user_id))
    }

    pub async fn insert_item(&self, cart_id: &str, item: &CartItem) -> DbResult<()> {
        debug!(cart_id = %cart_id, product_id = %item.product_id, quantity = item.quantity, "Adding cart item");

        let mut tx = crate::pool::begin_write_on(&self.pool).await?;
        sqlx::query(
            r#"
            INSERT INTO cart_items (
                id, cart_id, product_id, customization_id, quantity,
                unit_price_at_add_cents, added_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&item.id)
        .bind(cart_id)
        .bind(&item.product_id)
        .bind(&item.customization_id)
        .bind(i64::from(item.quantity))
        .bind(item.unit_price_at_add.to_cents())
        .bind(item.added_at)
        .bind(item.updated_at)
        .execute(&mut *tx)
        .await?;
        touch(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Sets quantity and re-snapshots the unit price. False when the item
    /// is not in this cart.
    pub async fn update_item(
        &self,
        cart_id: &str,
        item_id: &str,
        quantity: u32,
        unit_price: Money,
    ) -> DbResult<bool> {
        let mut tx = crate::pool::begin_write_on(&self.pool).await?;
        let result = sqlx::query(
            r#"
            UPDATE cart_items
            SET quantity = ?1, unit_price_at_add_cents = ?2, updated_at = ?3
            WHERE id = ?4 AND cart_id = ?5
            "#,
        )
        .bind(i64::from(quantity))
        .bind(unit_price.to_cents())
        .bind(Utc::now())
        .bind(item_id)
        .bind(cart_id)
        .execute(&mut *tx)
        .await?;
        touch(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn remove_item(&self, cart_id: &str, item_id: &str) -> DbResult<bool> {
        let mut tx = crate::pool::begin_write_on(&self.pool).await?;
        let result = sqlx::query("DELETE FROM cart_items WHERE id = ?1 AND cart_id = ?2")
            .bind(item_id)
            .bind(cart_id)
            .execute(&mut *tx)
            .await?;
        touch(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn clear(&self, cart_id: &str) -> DbResult<u64> {
        let mut tx = crate::pool::begin_write_on(&self.pool).await?;
        let removed = self.clear_tx(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Removes every item inside the caller's transaction.
    pub async fn clear_tx(&self, conn: &mut SqliteConnection, cart_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = ?1")
            .bind(cart_id)
            .execute(&mut *conn)
            .await?;
        touch(conn, cart_id).await?;
        Ok(result.rows_affected())
    }

    /// Deletes carts untouched for `stale_days`. Items cascade.
    pub async fn delete_stale(&self, now: DateTime<Utc>, stale_days: i64) -> DbResult<u64> {
        let cutoff = now - Duration::days(stale_days);
        let mut tx = crate::pool::begin_write_on(&self.pool).await?;
        let result = sqlx::query("DELETE FROM carts WHERE updated_at < ?1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() > 0 {
            info!(deleted = result.rows_affected(), cutoff = %cutoff, "Stale carts deleted");
        }
        Ok(result.rows_affected())
    }
}

async fn touch(conn: &mut SqliteConnection, cart_id: &str) -> DbResult<()> {
    sqlx::query("UPDATE carts SET updated_at = ?1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::db;

    fn item(product_id: &str, quantity: u32) -> CartItem {
        let now = Utc::now();
        CartItem {
            id: new_id(),
            product_id: product_id.into(),
            customization_id: None,
            quantity,
            unit_price_at_add: Money::from_major(100),
            added_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_cart_lifecycle() {
        let db = db().await;
        let repo = db.carts();

        let cart = repo.get_or_create("user-1").await.unwrap();
        let again = repo.get_or_create("user-1").await.unwrap();
        assert_eq!(cart.id, again.id);

        let line = item("tee", 3);
        repo.insert_item(&cart.id, &line).await.unwrap();
        assert!(repo.update_item(&cart.id, &line.id, 7, Money::from_major(90)).await.unwrap());

        let loaded = repo.get_for_user("user-1").await.unwrap().unwrap();
        assert_eq!(loaded.items[0].quantity, 7);
        assert_eq!(loaded.items[0].unit_price_at_add, Money::from_major(90));

        assert_eq!(repo.clear(&cart.id).await.unwrap(), 1);
        assert!(repo.get_for_user("user-1").await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_item_untouched() {
        let db = db().await;
        let repo = db.carts();
        let mine = repo.get_or_create("user-1").await.unwrap();
        let theirs = repo.get_or_create("user-2").await.unwrap();
        let line = item("tee", 1);
        repo.insert_item(&theirs.id, &line).await.unwrap();

        assert!(!repo.remove_item(&mine.id, &line.id).await.unwrap());
        assert!(!repo.update_item(&mine.id, &line.id, 5, Money::from_major(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_line_rejected() {
        let db = db().await;
        let repo = db.carts();
        let cart = repo.get_or_create("user-1").await.unwrap();
        repo.insert_item(&cart.id, &item("tee", 1)).await.unwrap();
        assert!(repo.insert_item(&cart.id, &item("tee", 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_stale() {
        let db = db().await;
        let repo = db.carts();
        repo.get_or_create("user-1").await.unwrap();

        assert_eq!(repo.delete_stale(Utc::now(), 30).await.unwrap(), 0);
        assert_eq!(repo.delete_stale(Utc::now() + Duration::days(31), 30).await.unwrap(), 1);
        assert!(repo.get_for_user("user-1").await.unwrap().is_none());
    }
}
