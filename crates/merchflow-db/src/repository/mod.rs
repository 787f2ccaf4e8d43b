//! # Repository Module
//!
//! Database repository implementations for MerchFlow.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories and Transactions                        │
//! │                                                                         │
//! │  Engine component                                                       │
//! │       │                                                                 │
//! │       ├── reads:   db.orders().get(id)          (pool)                  │
//! │       │                                                                 │
//! │       └── writes:  let mut tx = db.begin_write()                        │
//! │                    db.orders().transition_tx(&mut tx, ...)              │
//! │                    db.payments().capture_tx(&mut tx, ...)               │
//! │                    tx.commit()                                          │
//! │                                                                         │
//! │  `*_tx` methods take `&mut SqliteConnection` so several repositories    │
//! │  can share one transaction. Rows map to `*Record` structs (FromRow)     │
//! │  and are converted to merchflow-core types at the boundary.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`CatalogRepository`] - Products and their quantity price tiers
//! - [`PartnerRepository`] - Partner registry by category
//! - [`AddressRepository`] - Client address book
//! - [`CommissionRepository`] - Commission configs and tiers
//! - [`DiscountRepository`] - Discounts and discount limits
//! - [`AuditRepository`] - Before/after audit trail
//! - [`CartRepository`] - Carts and cart items
//! - [`OrderRepository`] - Orders, items, history, partner assignments
//! - [`PaymentRepository`] - Gateway payments
//! - [`ReservationRepository`] - Stock reservations
//! - [`SettlementRepository`] - Settlements and settlement lines

pub mod address;
pub mod audit;
pub mod cart;
pub mod catalog;
pub mod commission;
pub mod discount;
pub mod order;
pub mod partner;
pub mod payment;
pub mod reservation;
pub mod settlement;

pub use address::AddressRepository;
pub use audit::{AuditEntry, AuditRepository};
pub use cart::CartRepository;
pub use catalog::CatalogRepository;
pub use commission::CommissionRepository;
pub use discount::DiscountRepository;
pub use order::{OrderRepository, UnsettledOrder};
pub use partner::{Partner, PartnerRepository};
pub use payment::PaymentRepository;
pub use reservation::{ReservationRepository, StockReservation};
pub use settlement::SettlementRepository;

use merchflow_core::money::Rate;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// New UUID v4 primary key.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Maps a stored non-negative integer to `u32`.
pub(crate) fn to_u32(entity: &str, id: &str, value: i64) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::corrupt(entity, id, format!("value {} out of range", value)))
}

/// Maps stored basis points to a `Rate`.
pub(crate) fn to_rate(entity: &str, id: &str, bps: i64) -> DbResult<Rate> {
    to_u32(entity, id, bps).map(Rate::from_bps)
}

pub(crate) fn bps(rate: Rate) -> i64 {
    i64::from(rate.bps())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use merchflow_core::money::Money;
    use merchflow_core::types::{PricingTier, Product, ShippingAddress};

    use crate::{Database, DbConfig};

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn product(id: &str, partner_id: &str) -> Product {
        Product {
            id: id.into(),
            name: format!("Product {}", id),
            partner_id: partner_id.into(),
            category: "apparel".into(),
            tax_category: "6109".into(),
            base_price: Money::from_major(150),
            tiers: vec![
                PricingTier::new(1, Some(9), Money::from_major(150)),
                PricingTier::new(10, None, Money::from_major(100)),
            ],
            is_active: true,
            track_inventory: false,
            stock: None,
            updated_at: Utc::now(),
        }
    }

    pub fn address() -> ShippingAddress {
        ShippingAddress {
            recipient_name: "Asha Rao".into(),
            phone: "9876543210".into(),
            line1: "12 MG Road".into(),
            line2: None,
            city: "Bengaluru".into(),
            state: "Karnataka".into(),
            postal_code: "560001".into(),
        }
    }
}
