//! # merchflow-server: HTTP API
//!
//! axum transport over [`merchflow_engine::Engine`]. Handlers extract the
//! caller, call exactly one engine operation and serialize the result;
//! every failure leaves as an [`ApiError`].
//!
//! ## Route Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  GET  /health                                                           │
//! │                                                                         │
//! │  Client     /cart, /cart/items/{id}, /cart/validation,                  │
//! │             /cart/accept-prices, /addresses, /checkout                  │
//! │  Gateway    /payments/confirm                                           │
//! │  Any role   /orders, /orders/{id}, /orders/{id}/history,                │
//! │             /orders/{id}/cancel, /orders/{id}/deliver                   │
//! │  Partner    /partner/orders/{id}/{accept,reject,production,ship},      │
//! │             /partner/discounts, /partner/settlements                    │
//! │  Operator   /admin/commission-configs, /admin/discounts,                │
//! │             /admin/discount-limits, /admin/orders/{id}/assign,          │
//! │             /admin/settlements                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod extract;
pub mod routes;

pub use error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use merchflow_engine::Engine;

/// Shared state handed to every handler.
pub struct AppState {
    pub engine: Engine,
}

pub type SharedState = Arc<AppState>;

/// Builds the full router over `engine`.
pub fn router(engine: Engine) -> Router {
    let state = Arc::new(AppState { engine });

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::cart::routes())
        .merge(routes::orders::routes())
        .merge(routes::partner::routes())
        .merge(routes::admin::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
