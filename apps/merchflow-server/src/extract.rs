//! # Request Extractors
//!
//! Caller identity plus JSON/query wrappers whose rejections use the
//! [`ApiError`] shape.
//!
//! ## Caller Identity
//! Authentication happens in front of this service. The gateway forwards
//! the verified identity as two headers:
//!
//! ```text
//! x-merchflow-role: client | partner | operator
//! x-merchflow-id:   <user, partner or operator id>
//! ```
//!
//! Handlers take one of the extractors below; a wrong role is rejected
//! before the engine is touched.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;

use merchflow_core::types::Actor;

use crate::error::ApiError;

pub const ROLE_HEADER: &str = "x-merchflow-role";
pub const ID_HEADER: &str = "x-merchflow-id";

const MAX_ID_LEN: usize = 128;

/// Any authenticated caller.
#[derive(Debug, Clone)]
pub struct Caller(pub Actor);

/// A client; holds the user id.
#[derive(Debug, Clone)]
pub struct ClientCaller(pub String);

/// A fulfilment partner; holds the partner id.
#[derive(Debug, Clone)]
pub struct PartnerCaller(pub String);

/// An operator; holds the full actor for audit entries.
#[derive(Debug, Clone)]
pub struct OperatorCaller(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Reads the forwarded identity. System is never accepted from outside.
pub fn actor_from_parts(parts: &Parts) -> Result<Actor, ApiError> {
    let role = header(parts, ROLE_HEADER).ok_or_else(ApiError::unauthenticated)?;
    let id = header(parts, ID_HEADER)
        .filter(|id| id.len() <= MAX_ID_LEN)
        .ok_or_else(ApiError::unauthenticated)?
        .to_string();

    match role.to_ascii_lowercase().as_str() {
        "client" => Ok(Actor::Client(id)),
        "partner" => Ok(Actor::Partner(id)),
        "operator" => Ok(Actor::Operator(id)),
        _ => Err(ApiError::unauthenticated()),
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_parts(parts).map(Caller)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match actor_from_parts(parts)? {
            Actor::Client(id) => Ok(ClientCaller(id)),
            _ => Err(ApiError::forbidden("client")),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for PartnerCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match actor_from_parts(parts)? {
            Actor::Partner(id) => Ok(PartnerCaller(id)),
            _ => Err(ApiError::forbidden("partner")),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for OperatorCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match actor_from_parts(parts)? {
            actor @ Actor::Operator(_) => Ok(OperatorCaller(actor)),
            _ => Err(ApiError::forbidden("operator")),
        }
    }
}

// =============================================================================
// Body and Query
// =============================================================================

/// `Json<T>` with malformed bodies reported as `MALFORMED_REQUEST`.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

/// `Query<T>` with bad parameters reported as `MALFORMED_REQUEST`.
#[derive(Debug, Clone)]
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::new(rejection.status(), "MALFORMED_REQUEST", rejection.body_text())
}

fn query_rejection(rejection: QueryRejection) -> ApiError {
    ApiError::new(rejection.status(), "MALFORMED_REQUEST", rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_roles() {
        let p = parts(&[(ROLE_HEADER, "Partner"), (ID_HEADER, "p-1")]);
        assert_eq!(actor_from_parts(&p).unwrap(), Actor::Partner("p-1".into()));

        let p = parts(&[(ROLE_HEADER, "operator"), (ID_HEADER, " op-9 ")]);
        assert_eq!(actor_from_parts(&p).unwrap(), Actor::Operator("op-9".into()));
    }

    #[test]
    fn test_missing_or_unknown_identity() {
        assert_eq!(actor_from_parts(&parts(&[])).unwrap_err().code, "UNAUTHENTICATED");

        let p = parts(&[(ROLE_HEADER, "system"), (ID_HEADER, "x")]);
        assert_eq!(actor_from_parts(&p).unwrap_err().code, "UNAUTHENTICATED");

        let p = parts(&[(ROLE_HEADER, "client"), (ID_HEADER, "")]);
        assert!(actor_from_parts(&p).is_err());
    }
}
