//! # Error Types
//!
//! Domain-specific error types for merchflow-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  merchflow-core errors (this file)                                     │
//! │  ├── CoreError        - Business rule violations                       │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── TierViolation    - Why a tier set is malformed                    │
//! │                                                                         │
//! │  merchflow-db         └── DbError      - Database failures              │
//! │  merchflow-engine     └── EngineError  - Orchestration failures         │
//! │  merchflow-server     └── ApiError     - What callers see               │
//! │                                                                         │
//! │  Every variant maps to one ErrorKind, which decides the HTTP status    │
//! │  and whether the caller may retry.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::cart::CartItemIssue;
use crate::money::{Money, Rate};
use crate::order::OrderStatus;

// =============================================================================
// Error Kind
// =============================================================================

/// Caller-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad input. The caller fixes the request and tries again.
    Validation,
    /// Current state disagrees with the request.
    Conflict,
    /// Signature mismatch or configuration corruption. Always logged.
    Integrity,
    /// Gateway timeout/unavailable. Retryable.
    Upstream,
    /// Missing, or not owned by the requester.
    NotFound,
    /// Anything else. Details stay in the logs.
    Internal,
}

// =============================================================================
// Tier Violation
// =============================================================================

/// The reason a commission or pricing tier set was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierViolation {
    #[error("tier set is empty")]
    Empty,

    #[error("lowest tier starts at {min}, expected {expected}")]
    DoesNotStartAtFloor { min: String, expected: String },

    #[error("gap between tier {index} (max {max}) and the next tier (min {next_min})")]
    Gap {
        index: usize,
        max: String,
        next_min: String,
    },

    #[error("tier {index} (max {max}) overlaps the next tier (min {next_min})")]
    Overlap {
        index: usize,
        max: String,
        next_min: String,
    },

    #[error("tier {index} has no upper bound but is not the highest tier")]
    UnboundedNotLast { index: usize },

    #[error("highest tier must have no upper bound")]
    LastTierBounded,

    #[error("tier {index} has max below min")]
    InvertedRange { index: usize },

    #[error("tier {index} bounds must be whole currency units")]
    FractionalBound { index: usize },

    #[error("tier {index} rate {rate} is outside 0-100%")]
    RateOutOfRange { index: usize, rate: Rate },

    #[error("tier {index} price must be positive")]
    NonPositivePrice { index: usize },
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A commission or pricing tier set failed validation.
    ///
    /// ## When This Occurs
    /// - Operator saves a commission config with a gap between tiers
    /// - Catalog hands over a product whose quantity tiers overlap
    #[error("Invalid tier set: {0}")]
    InvalidTierSet(#[from] TierViolation),

    /// No pricing tier covers the requested quantity.
    ///
    /// ## When This Occurs
    /// Product tiers were edited outside validation and now leave a hole.
    /// This is a data-integrity condition, not a user mistake.
    #[error("No pricing tier covers quantity {quantity} for product {product_id}")]
    TierCoverage { product_id: String, quantity: u32 },

    /// Discount outside the configured min/max bounds.
    #[error("Discount {requested} is outside the allowed range {min} to {max}")]
    DiscountOutOfBounds { requested: Rate, min: Rate, max: Rate },

    /// Partner proposed a discount without accepting the discount terms.
    #[error("Discount terms must be accepted")]
    TermsNotAccepted,

    /// Another approved discount already covers an overlapping window.
    ///
    /// ## User Workflow
    /// ```text
    /// Operator approves D2 for product P
    ///      │
    ///      ▼
    /// D1 is APPROVED for P, windows overlap
    ///      │
    ///      ├── supersede = false ──► DiscountAlreadyActive { D1 }
    ///      └── supersede = true  ──► D1 disabled, D2 approved
    /// ```
    #[error("Discount {active_discount_id} is already active for product {product_id}")]
    DiscountAlreadyActive {
        product_id: String,
        active_discount_id: String,
    },

    /// Discount status change not allowed from the current status.
    #[error("Discount {discount_id} is {current}, cannot {action}")]
    InvalidDiscountTransition {
        discount_id: String,
        current: String,
        action: String,
    },

    /// Cart has items that are stale, inactive or out of stock.
    #[error("Cart has {} item(s) that need attention", issues.len())]
    CartInvalid {
        issues: Vec<CartItemIssue>,
        prices_changed: bool,
    },

    /// Checkout attempted with nothing in the cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Products in the cart belong to more than one partner.
    #[error("Cart contains products from {} partners; one order ships from one partner", partner_ids.len())]
    MultiPartnerCart { partner_ids: Vec<String> },

    /// Order status transition not in the state machine.
    #[error("Order {order_id} is {current:?}, cannot move to {requested:?}")]
    InvalidTransition {
        order_id: String,
        current: OrderStatus,
        requested: OrderStatus,
    },

    /// Cancellation refused for the order's current status or actor.
    #[error("Order {order_id} cannot be cancelled while {current:?}")]
    NotCancellable {
        order_id: String,
        current: OrderStatus,
    },

    /// Production updates only move forward.
    #[error("Production is already at {current}, cannot move to {requested}")]
    ProductionRegression { current: String, requested: String },

    /// Settlement status change not allowed.
    #[error("Settlement {settlement_id} is {current}, cannot move to {requested}")]
    InvalidSettlementTransition {
        settlement_id: String,
        current: String,
        requested: String,
    },

    /// No delivered, unsettled orders in the requested period.
    #[error("No eligible orders for partner {partner_id} in the requested period")]
    EmptyPeriod { partner_id: String },

    /// Negative or otherwise invalid money amount.
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Money, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Category used for status mapping and retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidTierSet(_)
            | CoreError::DiscountOutOfBounds { .. }
            | CoreError::TermsNotAccepted
            | CoreError::EmptyCart
            | CoreError::CartTooLarge { .. }
            | CoreError::MultiPartnerCart { .. }
            | CoreError::InvalidAmount { .. }
            | CoreError::Validation(_) => ErrorKind::Validation,

            CoreError::DiscountAlreadyActive { .. }
            | CoreError::InvalidDiscountTransition { .. }
            | CoreError::CartInvalid { .. }
            | CoreError::InvalidTransition { .. }
            | CoreError::NotCancellable { .. }
            | CoreError::ProductionRegression { .. }
            | CoreError::InvalidSettlementTransition { .. }
            | CoreError::EmptyPeriod { .. } => ErrorKind::Conflict,

            CoreError::TierCoverage { .. } => ErrorKind::Integrity,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidTierSet(_) => "INVALID_TIER_SET",
            CoreError::TierCoverage { .. } => "TIER_COVERAGE_VIOLATION",
            CoreError::DiscountOutOfBounds { .. } => "DISCOUNT_OUT_OF_BOUNDS",
            CoreError::TermsNotAccepted => "TERMS_NOT_ACCEPTED",
            CoreError::DiscountAlreadyActive { .. } => "DISCOUNT_ALREADY_ACTIVE",
            CoreError::InvalidDiscountTransition { .. } => "INVALID_DISCOUNT_TRANSITION",
            CoreError::CartInvalid { .. } => "CART_INVALID",
            CoreError::EmptyCart => "CART_EMPTY",
            CoreError::CartTooLarge { .. } => "CART_TOO_LARGE",
            CoreError::MultiPartnerCart { .. } => "MULTI_PARTNER_CART",
            CoreError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            CoreError::NotCancellable { .. } => "ORDER_NOT_CANCELLABLE",
            CoreError::ProductionRegression { .. } => "PRODUCTION_REGRESSION",
            CoreError::InvalidSettlementTransition { .. } => "INVALID_SETTLEMENT_TRANSITION",
            CoreError::EmptyPeriod { .. } => "EMPTY_PERIOD",
            CoreError::InvalidAmount { .. } => "INVALID_AMOUNT",
            CoreError::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., invalid postal code, inverted date range).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::DiscountOutOfBounds {
            requested: Rate::from_percent(60),
            min: Rate::from_percent(1),
            max: Rate::from_percent(50),
        };
        assert_eq!(
            err.to_string(),
            "Discount 60.00% is outside the allowed range 1.00% to 50.00%"
        );
    }

    #[test]
    fn test_kinds_and_codes() {
        let err = CoreError::TierCoverage {
            product_id: "p1".into(),
            quantity: 5,
        };
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(err.code(), "TIER_COVERAGE_VIOLATION");

        let err: CoreError = TierViolation::Empty.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "INVALID_TIER_SET");

        let err = CoreError::MultiPartnerCart {
            partner_ids: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.code(), "MULTI_PARTNER_CART");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "address_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.kind(), ErrorKind::Validation);
    }
}
