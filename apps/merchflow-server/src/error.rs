//! # API Error Type
//!
//! The one error shape callers ever see.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Handler                                                                │
//! │  Result<Json<T>, ApiError>                                              │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  EngineError ──► kind() ──► HTTP status                                 │
//! │              └─► code() ──► body.code                                   │
//! │                                                                         │
//! │  Validation 400 · NotFound 404 · Conflict 409 · Integrity 422           │
//! │  Upstream 502/503 · Internal 500 (message replaced, details logged)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Response Body
//! ```json
//! {
//!   "code": "ORDER_NOT_CANCELLABLE",
//!   "message": "Order 7f3c... cannot be cancelled in status SHIPPED",
//!   "current_status": "SHIPPED"
//! }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use merchflow_core::order::OrderStatus;
use merchflow_core::ErrorKind;
use merchflow_engine::EngineError;

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,

    /// Machine-readable error code
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Authoritative order status carried by a conflict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<OrderStatus>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code: code.into(),
            message: message.into(),
            current_status: None,
        }
    }

    /// No caller identity on the request.
    pub fn unauthenticated() -> Self {
        ApiError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHENTICATED",
            "Missing or malformed caller identity",
        )
    }

    /// Caller identity present but with the wrong role for the route.
    pub fn forbidden(role: &str) -> Self {
        ApiError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            format!("This operation requires the {} role", role),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind, retryable_timeout: bool) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Integrity => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Upstream if retryable_timeout => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let kind = err.kind();
        let status = status_for(kind, matches!(err, EngineError::GatewayTimeout { .. }));

        let message = match kind {
            ErrorKind::Internal => {
                // Log the actual error but return a generic message
                error!(code = err.code(), error = %err, "Request failed");
                "Internal error".to_string()
            }
            ErrorKind::Integrity => {
                error!(code = err.code(), error = %err, "Integrity failure");
                err.to_string()
            }
            ErrorKind::Upstream => {
                warn!(code = err.code(), error = %err, "Upstream failure");
                err.to_string()
            }
            _ => err.to_string(),
        };

        ApiError {
            status,
            code: err.code().to_string(),
            message,
            current_status: err.current_status(),
        }
    }
}

impl From<merchflow_db::DbError> for ApiError {
    fn from(err: merchflow_db::DbError) -> Self {
        EngineError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(&self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use merchflow_core::CoreError;
    use merchflow_db::DbError;

    #[test]
    fn test_conflict_carries_current_status() {
        let err: ApiError = EngineError::Core(CoreError::NotCancellable {
            order_id: "o-1".into(),
            current: OrderStatus::Shipped,
        })
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "ORDER_NOT_CANCELLABLE");
        assert_eq!(err.current_status, Some(OrderStatus::Shipped));
    }

    #[test]
    fn test_internal_message_is_generic() {
        let err: ApiError = EngineError::Database(DbError::QueryFailed(
            "SELECT * FROM orders WHERE secret".into(),
        ))
        .into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("SELECT"));
    }

    #[test]
    fn test_upstream_statuses() {
        let timeout: ApiError = EngineError::GatewayTimeout {
            operation: "create_payment_intent",
            secs: 10,
        }
        .into();
        assert_eq!(timeout.status, StatusCode::SERVICE_UNAVAILABLE);

        let refused: ApiError = EngineError::GatewayUnavailable {
            operation: "create_payment_intent",
            reason: "503".into(),
        }
        .into();
        assert_eq!(refused.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_not_found_and_signature() {
        let err: ApiError = EngineError::not_found("Order", "o-1").into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NOT_FOUND");

        let err: ApiError = EngineError::PaymentSignatureMismatch {
            gateway_order_id: "gw_1".into(),
        }
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
