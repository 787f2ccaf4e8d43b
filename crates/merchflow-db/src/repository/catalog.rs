//! # Catalog Repository
//!
//! Local copy of the product catalog: products, quantity price tiers and
//! tracked stock. Catalog management writes here; the core only reads.
//!
//! ## Available Stock
//! ```text
//! available = products.stock − Σ stock_reservations.quantity (status = active)
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use merchflow_core::money::Money;
use merchflow_core::types::{validate_pricing_tiers, PricingTier, Product};

use super::{new_id, to_u32};
use crate::error::{DbError, DbResult};
use crate::pool::begin_write_on;

#[derive(Debug, Clone, sqlx::FromRow)]
struct ProductRecord {
    id: String,
    name: String,
    partner_id: String,
    category: String,
    tax_category: String,
    base_price_cents: i64,
    is_active: bool,
    track_inventory: bool,
    stock: Option<i64>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TierRecord {
    min_qty: i64,
    max_qty: Option<i64>,
    unit_price_cents: i64,
}

/// Repository for catalog reads and catalog management writes.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Loads a product with its tiers ordered by `min_qty`.
    pub async fn get(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        get_tx(&mut conn, id).await
    }

    /// Active products, newest first.
    pub async fn list_active(&self, limit: u32) -> DbResult<Vec<Product>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM products WHERE is_active = 1 ORDER BY updated_at DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(product) = get_tx(&mut conn, &id).await? {
                products.push(product);
            }
        }
        Ok(products)
    }

    /// Inserts or replaces a product and rebuilds its tiers.
    pub async fn upsert(&self, product: &Product) -> DbResult<()> {
        validate_pricing_tiers(&product.tiers)
            .map_err(|e| DbError::corrupt("Product", product.id.clone(), e.to_string()))?;

        debug!(product_id = %product.id, tiers = product.tiers.len(), "Upserting product");

        let mut tx = begin_write_on(&self.pool).await?;

        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, partner_id, category, tax_category,
                base_price_cents, is_active, track_inventory, stock, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                partner_id = excluded.partner_id,
                category = excluded.category,
                tax_category = excluded.tax_category,
                base_price_cents = excluded.base_price_cents,
                is_active = excluded.is_active,
                track_inventory = excluded.track_inventory,
                stock = excluded.stock,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.partner_id)
        .bind(&product.category)
        .bind(&product.tax_category)
        .bind(product.base_price.to_cents())
        .bind(product.is_active)
        .bind(product.track_inventory)
        .bind(product.stock)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM product_price_tiers WHERE product_id = ?1")
            .bind(&product.id)
            .execute(&mut *tx)
            .await?;

        for tier in &product.tiers {
            sqlx::query(
                r#"
                INSERT INTO product_price_tiers (id, product_id, min_qty, max_qty, unit_price_cents)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(new_id())
            .bind(&product.id)
            .bind(i64::from(tier.min_qty))
            .bind(tier.max_qty.map(i64::from))
            .bind(tier.unit_price.to_cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE products SET is_active = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Current stock minus active reservations. `None` for untracked products.
    pub async fn available_stock(&self, product_id: &str) -> DbResult<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        available_stock_tx(&mut conn, product_id).await
    }

    /// Available stock as seen by an open transaction.
    pub async fn available_stock_tx(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
    ) -> DbResult<Option<i64>> {
        available_stock_tx(conn, product_id).await
    }
}

async fn get_tx(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
    let record: Option<ProductRecord> = sqlx::query_as(
        r#"
        SELECT id, name, partner_id, category, tax_category, base_price_cents,
               is_active, track_inventory, stock, updated_at
        FROM products
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(record) = record else {
        return Ok(None);
    };

    let tiers: Vec<TierRecord> = sqlx::query_as(
        r#"
        SELECT min_qty, max_qty, unit_price_cents
        FROM product_price_tiers
        WHERE product_id = ?1
        ORDER BY min_qty
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let tiers = tiers
        .into_iter()
        .map(|t| {
            Ok(PricingTier::new(
                to_u32("ProductTier", id, t.min_qty)?,
                t.max_qty.map(|max| to_u32("ProductTier", id, max)).transpose()?,
                Money::from_cents(t.unit_price_cents),
            ))
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(Some(Product {
        id: record.id,
        name: record.name,
        partner_id: record.partner_id,
        category: record.category,
        tax_category: record.tax_category,
        base_price: Money::from_cents(record.base_price_cents),
        tiers,
        is_active: record.is_active,
        track_inventory: record.track_inventory,
        stock: record.stock,
        updated_at: record.updated_at,
    }))
}

async fn available_stock_tx(conn: &mut SqliteConnection, product_id: &str) -> DbResult<Option<i64>> {
    let row: Option<(bool, Option<i64>, i64)> = sqlx::query_as(
        r#"
        SELECT p.track_inventory,
               p.stock,
               COALESCE((
                   SELECT SUM(r.quantity) FROM stock_reservations r
                   WHERE r.product_id = p.id AND r.status = 'active'
               ), 0)
        FROM products p
        WHERE p.id = ?1
        "#,
    )
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(match row {
        Some((true, stock, reserved)) => Some(stock.unwrap_or(0) - reserved),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{db, product};

    #[tokio::test]
    async fn test_upsert_and_get_round_trip() {
        let db = db().await;
        let mut tee = product("tee", "partner-1");
        db.catalog().upsert(&tee).await.unwrap();

        let loaded = db.catalog().get("tee").await.unwrap().unwrap();
        assert_eq!(loaded.tiers, tee.tiers);
        assert_eq!(loaded.unit_price_for(12).unwrap(), Money::from_major(100));

        tee.tiers.pop();
        tee.tiers[0].max_qty = None;
        db.catalog().upsert(&tee).await.unwrap();
        let loaded = db.catalog().get("tee").await.unwrap().unwrap();
        assert_eq!(loaded.tiers.len(), 1);
    }

    #[tokio::test]
    async fn test_available_stock_untracked_is_none() {
        let db = db().await;
        db.catalog().upsert(&product("tee", "partner-1")).await.unwrap();
        assert_eq!(db.catalog().available_stock("tee").await.unwrap(), None);

        let mut mug = product("mug", "partner-1");
        mug.track_inventory = true;
        mug.stock = Some(40);
        db.catalog().upsert(&mug).await.unwrap();
        assert_eq!(db.catalog().available_stock("mug").await.unwrap(), Some(40));
    }

    #[tokio::test]
    async fn test_missing_product() {
        let db = db().await;
        assert!(db.catalog().get("nope").await.unwrap().is_none());
        assert!(db.catalog().set_active("nope", false).await.is_err());
    }
}
