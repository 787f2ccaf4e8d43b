//! # Address Repository
//!
//! Client address book. Every read is scoped by owner: an address owned by
//! someone else is indistinguishable from a missing one.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use merchflow_core::types::{Address, ShippingAddress};

use super::new_id;
use crate::error::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct AddressRecord {
    id: String,
    user_id: String,
    recipient_name: String,
    phone: String,
    line1: String,
    line2: Option<String>,
    city: String,
    state: String,
    postal_code: String,
    created_at: DateTime<Utc>,
}

impl From<AddressRecord> for Address {
    fn from(r: AddressRecord) -> Self {
        Address {
            id: r.id,
            user_id: r.user_id,
            shipping: ShippingAddress {
                recipient_name: r.recipient_name,
                phone: r.phone,
                line1: r.line1,
                line2: r.line2,
                city: r.city,
                state: r.state,
                postal_code: r.postal_code,
            },
            created_at: r.created_at,
        }
    }
}

const SELECT_ADDRESS: &str = r#"
    SELECT id, user_id, recipient_name, phone, line1, line2, city, state, postal_code, created_at
    FROM addresses
"#;

#[derive(Debug, Clone)]
pub struct AddressRepository {
    pool: SqlitePool,
}

impl AddressRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AddressRepository { pool }
    }

    pub async fn create(&self, user_id: &str, shipping: &ShippingAddress) -> DbResult<Address> {
        let address = Address {
            id: new_id(),
            user_id: user_id.to_string(),
            shipping: shipping.clone(),
            created_at: Utc::now(),
        };

        debug!(address_id = %address.id, user_id = %user_id, "Creating address");

        sqlx::query(
            r#"
            INSERT INTO addresses (
                id, user_id, recipient_name, phone, line1, line2, city, state, postal_code, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&address.id)
        .bind(&address.user_id)
        .bind(&shipping.recipient_name)
        .bind(&shipping.phone)
        .bind(&shipping.line1)
        .bind(&shipping.line2)
        .bind(&shipping.city)
        .bind(&shipping.state)
        .bind(&shipping.postal_code)
        .bind(address.created_at)
        .execute(&self.pool)
        .await?;

        Ok(address)
    }

    /// Fails with `NotFound` when missing or owned by another user.
    pub async fn get_owned(&self, id: &str, user_id: &str) -> DbResult<Address> {
        let record: Option<AddressRecord> =
            sqlx::query_as(&format!("{} WHERE id = ?1 AND user_id = ?2", SELECT_ADDRESS))
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        record
            .map(Address::from)
            .ok_or_else(|| DbError::not_found("Address", id))
    }

    pub async fn list(&self, user_id: &str) -> DbResult<Vec<Address>> {
        let records: Vec<AddressRecord> =
            sqlx::query_as(&format!("{} WHERE user_id = ?1 ORDER BY created_at", SELECT_ADDRESS))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(records.into_iter().map(Address::from).collect())
    }

    pub async fn delete_owned(&self, id: &str, user_id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM addresses WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Address", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{address, db};

    #[tokio::test]
    async fn test_foreign_address_is_not_found() {
        let db = db().await;
        let created = db.addresses().create("user-1", &address()).await.unwrap();

        let own = db.addresses().get_owned(&created.id, "user-1").await.unwrap();
        assert_eq!(own.shipping.city, "Bengaluru");

        let err = db.addresses().get_owned(&created.id, "user-2").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
        assert!(db.addresses().delete_owned(&created.id, "user-2").await.is_err());
        assert_eq!(db.addresses().list("user-1").await.unwrap().len(), 1);
    }
}
