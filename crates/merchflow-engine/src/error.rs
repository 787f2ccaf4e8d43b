//! # Engine Error Types
//!
//! Error type for orchestration operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Wrapped        │  │   Payment       │  │     Fulfilment          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Core           │  │  SignatureMis-  │  │  NoOpenAssignment       │ │
//! │  │  Database       │  │   match         │  │  NoPartnerAvailable     │ │
//! │  │  Config         │  │  AlreadyCaptured│  │  ProductUnavailable     │ │
//! │  │                 │  │  Expired        │  │  ConcurrentUpdate       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Upstream      │  │    Lookup       │                              │
//! │  │                 │  │                 │                              │
//! │  │  GatewayUnavail │  │  NotFound       │                              │
//! │  │  GatewayTimeout │  │  (also: not     │                              │
//! │  │                 │  │   yours)        │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use merchflow_core::order::OrderStatus;
use merchflow_core::{CoreError, ErrorKind, ValidationError};
use merchflow_db::DbError;

use crate::config::ConfigError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
///
/// Every variant maps to one [`ErrorKind`] and a stable code; the server
/// turns those into the response status and body.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    // =========================================================================
    // Lookup
    // =========================================================================
    /// Missing, or owned by someone else. Both look the same to callers.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // =========================================================================
    // Payment
    // =========================================================================
    /// Gateway signature did not verify.
    ///
    /// ## When This Occurs
    /// - Tampered or forged confirmation
    /// - Gateway key rotated without updating `checkout.gateway_key_secret`
    ///
    /// The order stays PENDING_PAYMENT.
    #[error("Payment signature mismatch for gateway order {gateway_order_id}")]
    PaymentSignatureMismatch { gateway_order_id: String },

    /// The order was already paid with a different gateway payment.
    #[error("Order {order_id} is already paid")]
    PaymentAlreadyCaptured { order_id: String },

    /// Confirmation arrived after the payment window was swept.
    ///
    /// ## When This Occurs
    /// The client paid at the gateway, but the confirmation reached us
    /// after the expiry sweep moved the order to PAYMENT_FAILED. The
    /// captured funds need a manual refund.
    #[error("Payment window for order {order_id} has expired")]
    PaymentExpired { order_id: String },

    // =========================================================================
    // Fulfilment
    // =========================================================================
    /// Partner acted on an order without an open assignment.
    #[error("Order {order_id} has no open assignment for this partner")]
    NoOpenAssignment { order_id: String },

    /// Every eligible partner already rejected the order.
    #[error("No partner available to take order {order_id}")]
    NoPartnerAvailable { order_id: String },

    /// Product missing from the catalog or switched off.
    #[error("Product {product_id} is not available")]
    ProductUnavailable { product_id: String },

    /// A conditional update lost to a concurrent writer.
    #[error("{entity} {id} was changed by another request")]
    ConcurrentUpdate { entity: &'static str, id: String },

    // =========================================================================
    // Upstream
    // =========================================================================
    /// Payment or payout gateway refused or failed the call.
    #[error("Gateway unavailable during {operation}: {reason}")]
    GatewayUnavailable { operation: &'static str, reason: String },

    /// Gateway did not answer in time.
    #[error("Gateway timed out during {operation} after {secs}s")]
    GatewayTimeout { operation: &'static str, secs: u64 },
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database(DbError::from(err))
    }
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound { entity, id: id.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Core(e) => e.kind(),
            EngineError::Database(e) => e.kind(),
            EngineError::Config(_) => ErrorKind::Internal,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::PaymentSignatureMismatch { .. } => ErrorKind::Integrity,
            EngineError::PaymentAlreadyCaptured { .. }
            | EngineError::PaymentExpired { .. }
            | EngineError::NoOpenAssignment { .. }
            | EngineError::NoPartnerAvailable { .. }
            | EngineError::ProductUnavailable { .. }
            | EngineError::ConcurrentUpdate { .. } => ErrorKind::Conflict,
            EngineError::GatewayUnavailable { .. } | EngineError::GatewayTimeout { .. } => {
                ErrorKind::Upstream
            }
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Core(e) => e.code(),
            EngineError::Database(e) => e.code(),
            EngineError::Config(_) => "CONFIGURATION_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::PaymentSignatureMismatch { .. } => "PAYMENT_SIGNATURE_MISMATCH",
            EngineError::PaymentAlreadyCaptured { .. } => "PAYMENT_ALREADY_CAPTURED",
            EngineError::PaymentExpired { .. } => "PAYMENT_EXPIRED",
            EngineError::NoOpenAssignment { .. } => "NO_OPEN_ASSIGNMENT",
            EngineError::NoPartnerAvailable { .. } => "NO_PARTNER_AVAILABLE",
            EngineError::ProductUnavailable { .. } => "PRODUCT_UNAVAILABLE",
            EngineError::ConcurrentUpdate { .. } => "CONCURRENT_UPDATE",
            EngineError::GatewayUnavailable { .. } => "GATEWAY_UNAVAILABLE",
            EngineError::GatewayTimeout { .. } => "GATEWAY_TIMEOUT",
        }
    }

    /// Current order status carried by a conflict, if any.
    pub fn current_status(&self) -> Option<OrderStatus> {
        match self {
            EngineError::Core(CoreError::InvalidTransition { current, .. })
            | EngineError::Core(CoreError::NotCancellable { current, .. }) => Some(*current),
            _ => None,
        }
    }

    /// Returns true if the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Upstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_codes() {
        let err = EngineError::PaymentSignatureMismatch {
            gateway_order_id: "gw_1".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(err.code(), "PAYMENT_SIGNATURE_MISMATCH");

        let err = EngineError::GatewayTimeout {
            operation: "create_payment_intent",
            secs: 10,
        };
        assert!(err.is_retryable());
        assert_eq!(err.code(), "GATEWAY_TIMEOUT");

        let err: EngineError = DbError::not_found("Order", "o1").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_conflict_carries_current_status() {
        let err: EngineError = CoreError::NotCancellable {
            order_id: "o1".into(),
            current: OrderStatus::Shipped,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.current_status(), Some(OrderStatus::Shipped));
        assert!(!err.is_retryable());
    }
}
