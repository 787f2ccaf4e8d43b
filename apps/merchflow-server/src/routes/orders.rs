//! # Order Routes
//!
//! Shared by every role; the engine scopes each read to the caller, so a
//! client asking for someone else's order gets `NOT_FOUND`.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use merchflow_core::order::{Order, OrderStatus, OrderStatusHistory, RefundDecision};

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiQuery, Caller};
use crate::SharedState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/{order_id}", get(get_order))
        .route("/orders/{order_id}/history", get(history))
        .route("/orders/{order_id}/cancel", post(cancel))
        .route("/orders/{order_id}/deliver", post(mark_delivered))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

async fn list_orders(
    State(state): State<SharedState>,
    Caller(actor): Caller,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(ApiError::validation(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    Ok(Json(
        state
            .engine
            .orders
            .list_orders(&actor, query.status, limit)
            .await?,
    ))
}

async fn get_order(
    State(state): State<SharedState>,
    Caller(actor): Caller,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.engine.orders.get_order(&order_id, &actor).await?))
}

async fn history(
    State(state): State<SharedState>,
    Caller(actor): Caller,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Vec<OrderStatusHistory>>> {
    Ok(Json(state.engine.orders.history(&order_id, &actor).await?))
}

async fn cancel(
    State(state): State<SharedState>,
    Caller(actor): Caller,
    Path(order_id): Path<String>,
    ApiJson(req): ApiJson<CancelRequest>,
) -> ApiResult<Json<RefundDecision>> {
    Ok(Json(
        state
            .engine
            .orders
            .cancel(&order_id, &actor, &req.reason)
            .await?,
    ))
}

async fn mark_delivered(
    State(state): State<SharedState>,
    Caller(actor): Caller,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.engine.orders.mark_delivered(&order_id, &actor).await?))
}
