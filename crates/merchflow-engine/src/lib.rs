//! # merchflow-engine: Ordering Core Orchestration
//!
//! Wires the pure rules of `merchflow-core` to the database and to the
//! external collaborators (catalog, partner registry, payment gateway,
//! notifications, payouts).
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Components                              │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Commission     │  │ Discount       │  │ CartAggregator         │    │
//! │  │ Resolver       │  │ Resolver       │  │                        │    │
//! │  │                │  │                │  │ priced views, checkout │    │
//! │  │ tier sets,     │  │ proposals,     │  │ validation             │    │
//! │  │ default swap   │  │ approval       │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          │                   │                       │                  │
//! │          │                   └──────────┬────────────┘                  │
//! │          │                              ▼                               │
//! │          │                  ┌────────────────────────┐                  │
//! │          │                  │ CheckoutOrchestrator   │                  │
//! │          │                  │ freeze, pay, confirm   │                  │
//! │          │                  └───────────┬────────────┘                  │
//! │          │                              ▼                               │
//! │          │                  ┌────────────────────────┐                  │
//! │          │                  │ OrderStateMachine      │                  │
//! │          │                  │ assign → deliver,      │                  │
//! │          │                  │ cancel + refund        │                  │
//! │          │                  └───────────┬────────────┘                  │
//! │          ▼                              ▼                               │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ SettlementBatcher   delivered orders → partner earnings        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Sweeper: payment expiry, stale carts, scheduled settlements           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`commission`] - Commission configs and rate resolution
//! - [`discount`] - Discount proposals, approval, active lookup
//! - [`cart`] - Cart mutations and priced views
//! - [`checkout`] - Order freeze, payment intent, confirmation, expiry
//! - [`orders`] - Order lifecycle after payment
//! - [`settlement`] - Partner settlements and payouts
//! - [`sweeper`] - Background jobs
//! - [`ports`] - External collaborator traits and local implementations
//! - [`config`] - Engine configuration
//! - [`error`] - Engine error type
//!
//! ## Usage
//!
//! ```rust,ignore
//! use merchflow_engine::{Engine, EngineConfig, Ports};
//! use merchflow_db::{Database, DbConfig};
//!
//! let config = EngineConfig::load(None)?;
//! let db = Database::new(DbConfig::new(&config.server.database_path)).await?;
//! let ports = Ports::local(&db, &config);
//! let engine = Engine::new(db, config, ports);
//!
//! let (sweeper, handle) = engine.sweeper();
//! tokio::spawn(sweeper.run());
//!
//! let view = engine.carts.add_item("user-1", "tee", None, 12).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod checkout;
pub mod commission;
pub mod config;
pub mod discount;
pub mod error;
pub mod orders;
pub mod ports;
pub mod settlement;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use cart::{CartAggregator, CartLine, CartView};
pub use checkout::{CheckoutOrchestrator, CheckoutSession};
pub use commission::CommissionResolver;
pub use config::{ConfigError, EngineConfig};
pub use discount::DiscountResolver;
pub use error::{EngineError, EngineResult};
pub use orders::OrderStateMachine;
pub use ports::{Notification, PaymentIntent, Ports};
pub use settlement::{SettlementBatcher, SettlementRunSummary};
pub use sweeper::{Sweeper, SweeperHandle};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use merchflow_core::pricing::PricingEngine;
use merchflow_core::types::Actor;
use merchflow_db::repository::new_id;
use merchflow_db::{AuditEntry, Database};

// =============================================================================
// Engine
// =============================================================================

/// Every component, built once from one configuration and shared by
/// request handlers and the sweeper.
#[derive(Clone)]
pub struct Engine {
    pub config: EngineConfig,
    pub db: Database,
    pub ports: Ports,
    pub commission: CommissionResolver,
    pub discounts: DiscountResolver,
    pub pricing: PricingEngine,
    pub carts: CartAggregator,
    pub checkout: CheckoutOrchestrator,
    pub orders: OrderStateMachine,
    pub settlements: SettlementBatcher,
}

impl Engine {
    pub fn new(db: Database, config: EngineConfig, ports: Ports) -> Self {
        let pricing = PricingEngine::new(config.pricing_rules());
        let commission = CommissionResolver::new(db.clone(), config.fallback_rate());
        let discounts = DiscountResolver::new(db.clone(), ports.catalog.clone(), config.builtin_discount_limit());
        let carts = CartAggregator::new(db.clone(), ports.catalog.clone(), discounts.clone(), pricing.clone());
        let orders = OrderStateMachine::new(db.clone(), ports.clone(), config.refund_policy());
        let checkout = CheckoutOrchestrator::new(
            db.clone(),
            ports.clone(),
            carts.clone(),
            pricing.clone(),
            orders.clone(),
            config.payment_timeout(),
            config.gateway_timeout(),
        );
        let settlements = SettlementBatcher::new(db.clone(), ports.clone(), commission.clone(), config.gateway_timeout());

        Engine {
            config,
            db,
            ports,
            commission,
            discounts,
            pricing,
            carts,
            checkout,
            orders,
            settlements,
        }
    }

    /// Builds the background sweeper; spawn `Sweeper::run` to start it.
    pub fn sweeper(&self) -> (Sweeper, SweeperHandle) {
        Sweeper::new(
            self.db.clone(),
            self.checkout.clone(),
            self.settlements.clone(),
            self.config.sweeper.clone(),
        )
    }
}

// =============================================================================
// Audit Helpers
// =============================================================================

/// JSON snapshot for an audit entry. Unserializable values are skipped.
pub(crate) fn snapshot<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "Could not snapshot audited value");
            None
        }
    }
}

pub(crate) fn audit_entry(
    action: &str,
    entity_type: &str,
    entity_id: &str,
    actor: &Actor,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
    now: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry {
        id: new_id(),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        actor: actor.label(),
        before,
        after,
        created_at: now,
    }
}
