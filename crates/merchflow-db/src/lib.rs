//! # merchflow-db: Database Layer for MerchFlow
//!
//! SQLite persistence for the ordering core, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MerchFlow Data Flow                              │
//! │                                                                         │
//! │  HTTP handler → merchflow-engine (CheckoutOrchestrator, ...)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  merchflow-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │   │   │
//! │  │   │               │    │ OrderRepo     │    │              │   │   │
//! │  │   │ SqlitePool    │◄───│ PaymentRepo   │    │ 001_initial  │   │   │
//! │  │   │ begin_write   │    │ SettlementRepo│    │   _schema    │   │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation, configuration, write transactions
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use merchflow_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("merchflow.db")).await?;
//!
//! let cart = db.carts().get_or_create("user-1").await?;
//!
//! let mut tx = db.begin_write().await?;
//! db.orders().transition_tx(&mut tx, &order_id, from, to, now).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig, WriteTx};

pub use repository::{
    AddressRepository, AuditEntry, AuditRepository, CartRepository, CatalogRepository,
    CommissionRepository, DiscountRepository, OrderRepository, Partner, PartnerRepository,
    PaymentRepository, ReservationRepository, SettlementRepository, StockReservation,
    UnsettledOrder,
};
