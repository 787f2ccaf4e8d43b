//! # Domain Types
//!
//! Shared domain types that don't belong to a single component.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │   PricingTier   │   │ ShippingAddress │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  min_qty        │   │  recipient      │       │
//! │  │  partner_id     │   │  max_qty | ∞    │   │  state          │       │
//! │  │  category       │   │  unit_price     │   │  postal_code    │       │
//! │  │  tiers[]        │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │ DeliveryOption  │   │     Actor       │                             │
//! │  │  Standard       │   │  Client(id)     │                             │
//! │  │  Express        │   │  Partner(id)    │                             │
//! │  └─────────────────┘   │  Operator(id)   │                             │
//! │                        │  System         │                             │
//! │                        └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Products are owned by the catalog. This crate only reads them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult, TierViolation};
use crate::money::Money;
use crate::tier::{check_contiguous, TierRange};

// =============================================================================
// Product
// =============================================================================

/// One quantity band of a product's price list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTier {
    pub min_qty: u32,
    /// `None` means unbounded above.
    pub max_qty: Option<u32>,
    pub unit_price: Money,
}

impl PricingTier {
    pub fn new(min_qty: u32, max_qty: Option<u32>, unit_price: Money) -> Self {
        PricingTier {
            min_qty,
            max_qty,
            unit_price,
        }
    }

    /// Exact containment: `min_qty <= quantity <= max_qty`.
    pub fn contains(&self, quantity: u32) -> bool {
        quantity >= self.min_qty && self.max_qty.map_or(true, |max| quantity <= max)
    }
}

/// A product as handed over by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Partner that produces and ships this product.
    pub partner_id: String,
    /// Catalog category, used for discount limits and partner lookup.
    pub category: String,
    /// Tax classification code (HSN).
    pub tax_category: String,
    /// Price used when the product has no quantity tiers.
    pub base_price: Money,
    /// Ordered by `min_qty`.
    pub tiers: Vec<PricingTier>,
    pub is_active: bool,
    pub track_inventory: bool,
    /// On-hand stock when `track_inventory` is set.
    pub stock: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Selects the tier covering `quantity`.
    ///
    /// A product without tiers prices every quantity at `base_price`.
    pub fn unit_price_for(&self, quantity: u32) -> CoreResult<Money> {
        if self.tiers.is_empty() {
            return Ok(self.base_price);
        }

        self.tiers
            .iter()
            .find(|tier| tier.contains(quantity))
            .map(|tier| tier.unit_price)
            .ok_or_else(|| CoreError::TierCoverage {
                product_id: self.id.clone(),
                quantity,
            })
    }
}

/// Validates a product's quantity tiers (contiguous from 1, last unbounded).
pub fn validate_pricing_tiers(tiers: &[PricingTier]) -> CoreResult<()> {
    for (index, tier) in tiers.iter().enumerate() {
        if !tier.unit_price.amount().is_sign_positive() || tier.unit_price.is_zero() {
            return Err(TierViolation::NonPositivePrice { index }.into());
        }
    }

    let ranges: Vec<TierRange> = tiers
        .iter()
        .map(|t| TierRange::new(Decimal::from(t.min_qty), t.max_qty.map(Decimal::from)))
        .collect();
    check_contiguous(&ranges, Decimal::ONE, Decimal::ONE)?;
    Ok(())
}

// =============================================================================
// Delivery
// =============================================================================

/// Delivery speed chosen at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOption {
    #[default]
    Standard,
    Express,
}

impl fmt::Display for DeliveryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOption::Standard => write!(f, "standard"),
            DeliveryOption::Express => write!(f, "express"),
        }
    }
}

/// Delivery address frozen onto an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient_name: String,
    pub phone: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    /// State name or code; decides the CGST/SGST vs IGST split.
    pub state: String,
    pub postal_code: String,
}

/// An address book entry owned by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub shipping: ShippingAddress,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Actor
// =============================================================================

/// Who performed an action. Recorded on history and audit entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Client(String),
    Partner(String),
    Operator(String),
    /// Background sweepers and schedulers.
    System,
}

impl Actor {
    /// Stable `role:id` string for persistence.
    pub fn label(&self) -> String {
        match self {
            Actor::Client(id) => format!("client:{}", id),
            Actor::Partner(id) => format!("partner:{}", id),
            Actor::Operator(id) => format!("operator:{}", id),
            Actor::System => "system".to_string(),
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(self, Actor::Operator(_))
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product(tiers: Vec<PricingTier>) -> Product {
        Product {
            id: "p1".into(),
            name: "Logo Mug".into(),
            partner_id: "partner-1".into(),
            category: "drinkware".into(),
            tax_category: "6912".into(),
            base_price: Money::from_major(120),
            tiers,
            is_active: true,
            track_inventory: false,
            stock: None,
            updated_at: Utc::now(),
        }
    }

    fn mug_tiers() -> Vec<PricingTier> {
        vec![
            PricingTier::new(1, Some(9), Money::from_major(120)),
            PricingTier::new(10, Some(49), Money::from_major(100)),
            PricingTier::new(50, None, Money::from_major(85)),
        ]
    }

    #[test]
    fn test_unit_price_tier_selection() {
        let p = product(mug_tiers());
        assert_eq!(p.unit_price_for(1).unwrap(), Money::from_major(120));
        assert_eq!(p.unit_price_for(9).unwrap(), Money::from_major(120));
        assert_eq!(p.unit_price_for(12).unwrap(), Money::from_major(100));
        assert_eq!(p.unit_price_for(10_000).unwrap(), Money::from_major(85));
    }

    #[test]
    fn test_missing_tier_is_integrity_error() {
        let p = product(vec![PricingTier::new(10, None, Money::from_major(100))]);
        let err = p.unit_price_for(5).unwrap_err();
        assert!(matches!(err, CoreError::TierCoverage { quantity: 5, .. }));
    }

    #[test]
    fn test_no_tiers_uses_base_price() {
        let p = product(vec![]);
        assert_eq!(p.unit_price_for(3).unwrap(), Money::from_major(120));
    }

    #[test]
    fn test_validate_pricing_tiers() {
        assert!(validate_pricing_tiers(&mug_tiers()).is_ok());

        let overlapping = vec![
            PricingTier::new(1, Some(10), Money::from_major(120)),
            PricingTier::new(10, None, Money::from_major(100)),
        ];
        assert!(validate_pricing_tiers(&overlapping).is_err());

        let free = vec![PricingTier::new(1, None, Money::zero())];
        assert!(validate_pricing_tiers(&free).is_err());
    }

    #[test]
    fn test_actor_label() {
        assert_eq!(Actor::Operator("ops-1".into()).label(), "operator:ops-1");
        assert_eq!(Actor::System.label(), "system");
    }
}
