//! # Partner Routes
//!
//! Fulfilment actions on assigned orders, discount proposals and the
//! partner's own settlements.
//!
//! ```text
//! PENDING_ACCEPTANCE ─accept─► ACCEPTED ─production─► IN_PRODUCTION ─ship─► SHIPPED
//!         │
//!         └─reject─► PARTNER_REJECTED (operator reassigns)
//! ```

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use merchflow_core::discount::{Discount, DiscountProposal};
use merchflow_core::order::{Order, ProductionStage};
use merchflow_core::settlement::Settlement;

use crate::error::ApiResult;
use crate::extract::{ApiJson, PartnerCaller};
use crate::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/partner/orders/{order_id}/accept", post(accept_order))
        .route("/partner/orders/{order_id}/reject", post(reject_order))
        .route("/partner/orders/{order_id}/production", post(update_production))
        .route("/partner/orders/{order_id}/ship", post(mark_shipped))
        .route("/partner/discounts", get(list_discounts).post(propose_discount))
        .route("/partner/settlements", get(list_settlements))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ProductionRequest {
    pub stage: ProductionStage,
}

#[derive(Debug, Deserialize)]
pub struct ShipRequest {
    pub courier: String,
    pub tracking_number: String,
}

async fn accept_order(
    State(state): State<SharedState>,
    PartnerCaller(partner_id): PartnerCaller,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.engine.orders.accept_order(&order_id, &partner_id).await?))
}

async fn reject_order(
    State(state): State<SharedState>,
    PartnerCaller(partner_id): PartnerCaller,
    Path(order_id): Path<String>,
    ApiJson(req): ApiJson<RejectRequest>,
) -> ApiResult<Json<Order>> {
    Ok(Json(
        state
            .engine
            .orders
            .reject_order(&order_id, &partner_id, &req.reason)
            .await?,
    ))
}

async fn update_production(
    State(state): State<SharedState>,
    PartnerCaller(partner_id): PartnerCaller,
    Path(order_id): Path<String>,
    ApiJson(req): ApiJson<ProductionRequest>,
) -> ApiResult<Json<Order>> {
    Ok(Json(
        state
            .engine
            .orders
            .update_production(&order_id, &partner_id, req.stage)
            .await?,
    ))
}

async fn mark_shipped(
    State(state): State<SharedState>,
    PartnerCaller(partner_id): PartnerCaller,
    Path(order_id): Path<String>,
    ApiJson(req): ApiJson<ShipRequest>,
) -> ApiResult<Json<Order>> {
    Ok(Json(
        state
            .engine
            .orders
            .mark_shipped(&order_id, &partner_id, &req.courier, &req.tracking_number)
            .await?,
    ))
}

async fn propose_discount(
    State(state): State<SharedState>,
    PartnerCaller(partner_id): PartnerCaller,
    ApiJson(proposal): ApiJson<DiscountProposal>,
) -> ApiResult<(StatusCode, Json<Discount>)> {
    let discount = state.engine.discounts.propose(&partner_id, proposal).await?;
    Ok((StatusCode::CREATED, Json(discount)))
}

async fn list_discounts(
    State(state): State<SharedState>,
    PartnerCaller(partner_id): PartnerCaller,
) -> ApiResult<Json<Vec<Discount>>> {
    Ok(Json(state.engine.discounts.list_for_partner(&partner_id).await?))
}

async fn list_settlements(
    State(state): State<SharedState>,
    PartnerCaller(partner_id): PartnerCaller,
) -> ApiResult<Json<Vec<Settlement>>> {
    Ok(Json(state.engine.settlements.list_for_partner(&partner_id).await?))
}
