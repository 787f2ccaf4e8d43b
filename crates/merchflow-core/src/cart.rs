//! # Cart
//!
//! The mutable pre-order basket and its checkout validation rules.
//!
//! ## Invariants
//! - One cart per user
//! - Lines are unique by `(product_id, customization_id)`; adding the same
//!   pair again merges quantities
//! - Quantity is always within `[MIN_ITEM_QUANTITY, MAX_ITEM_QUANTITY]`
//! - Each line remembers the effective unit price it was added at, so
//!   checkout can tell the client when prices moved
//!
//! ## Checkout Validation
//! ```text
//! for each item:
//!     product missing / inactive ──► issue, never auto-removed
//!     price now ≠ price at add   ──► issue + prices_changed = true
//!     qty > available stock      ──► issue
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY, MIN_ITEM_QUANTITY};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub product_id: String,
    pub customization_id: Option<String>,
    pub quantity: u32,
    /// Effective unit price when the line was added or last refreshed,
    /// rounded to the persisted scale.
    pub unit_price_at_add: Money,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    pub fn matches(&self, product_id: &str, customization_id: Option<&str>) -> bool {
        self.product_id == product_id && self.customization_id.as_deref() == customization_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub user_id: String,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find(&self, product_id: &str, customization_id: Option<&str>) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|item| item.matches(product_id, customization_id))
    }

    pub fn item(&self, item_id: &str) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    /// Total number of units across all lines.
    pub fn unit_count(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

/// What an add-to-cart request resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartAddition {
    /// New line with this quantity.
    NewLine { quantity: u32 },
    /// Existing line grows to `quantity`.
    Merge { item_id: String, quantity: u32 },
}

/// Decides whether an add creates a line or merges, enforcing bounds on
/// the resulting quantity.
pub fn plan_addition(
    cart: &Cart,
    product_id: &str,
    customization_id: Option<&str>,
    quantity: u32,
) -> CoreResult<CartAddition> {
    validate_quantity(quantity)?;

    match cart.find(product_id, customization_id) {
        Some(existing) => {
            let merged = existing.quantity.saturating_add(quantity);
            validate_quantity(merged)?;
            Ok(CartAddition::Merge {
                item_id: existing.id.clone(),
                quantity: merged,
            })
        }
        None => {
            if cart.items.len() >= MAX_CART_ITEMS {
                return Err(CoreError::CartTooLarge {
                    max: MAX_CART_ITEMS,
                });
            }
            Ok(CartAddition::NewLine { quantity })
        }
    }
}

/// Quantity must be within `[1, 10000]`.
pub fn validate_quantity(quantity: u32) -> Result<(), ValidationError> {
    if !(MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&quantity) {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: i64::from(MIN_ITEM_QUANTITY),
            max: i64::from(MAX_ITEM_QUANTITY),
        });
    }
    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

/// Why a cart line cannot be checked out as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartIssue {
    /// Catalog no longer knows the product.
    ProductUnavailable,
    /// Product exists but is switched off.
    ProductInactive,
    /// Effective unit price moved since the line was added.
    PriceChanged { previous: Money, current: Money },
    /// Not enough stock for the requested quantity.
    InsufficientStock { requested: u32, available: i64 },
    /// Product tiers do not cover this quantity.
    PricingUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemIssue {
    pub item_id: String,
    pub product_id: String,
    pub issue: CartIssue,
}

/// Result of `validate_for_checkout`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartValidation {
    pub issues: Vec<CartItemIssue>,
    pub prices_changed: bool,
}

impl CartValidation {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn push(&mut self, item: &CartItem, issue: CartIssue) {
        if matches!(issue, CartIssue::PriceChanged { .. }) {
            self.prices_changed = true;
        }
        self.issues.push(CartItemIssue {
            item_id: item.id.clone(),
            product_id: item.product_id.clone(),
            issue,
        });
    }

    /// Converts a failed validation into `CartInvalid`.
    pub fn into_result(self) -> CoreResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CoreError::CartInvalid {
                issues: self.issues,
                prices_changed: self.prices_changed,
            })
        }
    }
}

/// Compares a line's remembered price with the current one at the
/// persisted scale.
pub fn price_issue(item: &CartItem, current_effective_unit: Money) -> Option<CartIssue> {
    let current = current_effective_unit.rounded();
    let previous = item.unit_price_at_add.rounded();
    (current != previous).then_some(CartIssue::PriceChanged { previous, current })
}

/// Stock check for tracked products. `available` already excludes
/// reservations held by other orders.
pub fn stock_issue(item: &CartItem, available: Option<i64>) -> Option<CartIssue> {
    let available = available?;
    (i64::from(item.quantity) > available).then_some(CartIssue::InsufficientStock {
        requested: item.quantity,
        available: available.max(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_with(items: Vec<CartItem>) -> Cart {
        Cart {
            id: "cart-1".into(),
            user_id: "user-1".into(),
            items,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item(id: &str, product: &str, custom: Option<&str>, qty: u32) -> CartItem {
        CartItem {
            id: id.into(),
            product_id: product.into(),
            customization_id: custom.map(String::from),
            quantity: qty,
            unit_price_at_add: Money::from_major(100),
            added_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_quantity_bounds() {
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(10_000).is_ok());
        assert!(validate_quantity(10_001).is_err());
    }

    #[test]
    fn test_add_merges_same_product_and_customization() {
        let cart = cart_with(vec![item("i1", "p1", Some("logo-a"), 5)]);

        let plan = plan_addition(&cart, "p1", Some("logo-a"), 3).unwrap();
        assert_eq!(
            plan,
            CartAddition::Merge {
                item_id: "i1".into(),
                quantity: 8
            }
        );

        let plan = plan_addition(&cart, "p1", None, 3).unwrap();
        assert_eq!(plan, CartAddition::NewLine { quantity: 3 });
    }

    #[test]
    fn test_merge_cannot_exceed_max() {
        let cart = cart_with(vec![item("i1", "p1", None, 9_999)]);
        assert!(plan_addition(&cart, "p1", None, 2).is_err());
    }

    #[test]
    fn test_cart_line_limit() {
        let items = (0..MAX_CART_ITEMS)
            .map(|n| item(&format!("i{}", n), &format!("p{}", n), None, 1))
            .collect();
        let cart = cart_with(items);
        assert!(matches!(
            plan_addition(&cart, "new", None, 1),
            Err(CoreError::CartTooLarge { .. })
        ));
    }

    #[test]
    fn test_validation_collects_issues() {
        let line = item("i1", "p1", None, 12);
        let mut validation = CartValidation::default();

        assert!(price_issue(&line, Money::from_major(100)).is_none());
        if let Some(issue) = price_issue(&line, Money::from_major(90)) {
            validation.push(&line, issue);
        }
        if let Some(issue) = stock_issue(&line, Some(4)) {
            validation.push(&line, issue);
        }
        assert!(stock_issue(&line, None).is_none());

        assert!(validation.prices_changed);
        assert_eq!(validation.issues.len(), 2);
        assert!(matches!(
            validation.into_result(),
            Err(CoreError::CartInvalid { prices_changed: true, .. })
        ));
    }
}
