//! # merchflow-core: Pure Pricing and Lifecycle Rules
//!
//! This crate holds every rule of MerchFlow that can be stated without I/O:
//! money math, tier validation, discount and commission resolution, the
//! order state machine, refunds and settlement arithmetic.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MerchFlow Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                merchflow-server (axum HTTP)                     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        merchflow-engine (checkout, orders, settlements)         │   │
//! │  └───────────────┬─────────────────────────────┬───────────────────┘   │
//! │                  │                             │                        │
//! │  ┌───────────────▼──────────────────┐  ┌───────▼───────────────────┐   │
//! │  │  ★ merchflow-core (THIS CRATE) ★ │  │  merchflow-db (SQLite)    │   │
//! │  │                                  │  │  repositories, migrations │   │
//! │  │  money  tier  commission         │  └───────────────────────────┘   │
//! │  │  discount  pricing  cart         │                                  │
//! │  │  order  settlement  validation   │                                  │
//! │  │                                  │                                  │
//! │  │  NO I/O • NO DATABASE • NO CLOCK │                                  │
//! │  └──────────────────────────────────┘                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: callers pass `now` in; nothing reads the clock
//!    except order number generation
//! 2. **Exact Money**: `Money` is a decimal; rounding happens only when a
//!    value is persisted or shown
//! 3. **Explicit Errors**: every failure is a typed `CoreError` with a
//!    stable code
//!
//! ## Example Usage
//!
//! ```rust
//! use merchflow_core::money::{Money, Rate};
//!
//! let unit = Money::from_major(100);
//! let discounted = unit.less_rate(Rate::from_percent(10));
//! assert_eq!(discounted * 12u32, Money::from_major(1080));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod commission;
pub mod discount;
pub mod error;
pub mod money;
pub mod order;
pub mod pricing;
pub mod settlement;
pub mod tier;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, TierViolation, ValidationError};
pub use money::{Money, Rate};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Smallest quantity a cart line may hold.
pub const MIN_ITEM_QUANTITY: u32 = 1;

/// Largest quantity a cart line may hold.
///
/// Bulk orders above this go through a quote, not the cart.
pub const MAX_ITEM_QUANTITY: u32 = 10_000;

/// Maximum distinct lines in a single cart.
pub const MAX_CART_ITEMS: usize = 100;
