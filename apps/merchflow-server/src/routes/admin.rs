//! # Operator Routes
//!
//! Commission configs, discount review and limits, partner assignment and
//! settlements. Every write here is audited by the engine under the
//! operator's id.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use merchflow_core::commission::{CommissionConfig, CommissionTier};
use merchflow_core::discount::{Discount, DiscountLimit};
use merchflow_core::order::Order;
use merchflow_core::settlement::{Settlement, SettlementPeriod};
use merchflow_engine::EngineError;

use crate::error::ApiResult;
use crate::extract::{ApiJson, OperatorCaller};
use crate::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/admin/commission-configs",
            get(list_commission_configs).post(save_commission_config),
        )
        .route("/admin/commission-configs/{config_id}/default", post(set_default_config))
        .route("/admin/discounts/pending", get(list_pending_discounts))
        .route("/admin/discounts/{discount_id}/approve", post(approve_discount))
        .route("/admin/discounts/{discount_id}/disable", post(disable_discount))
        .route("/admin/discount-limits", get(list_limits).put(set_limit))
        .route("/admin/orders/{order_id}/assign", post(assign_partner))
        .route("/admin/settlements", post(generate_settlement))
        .route("/admin/settlements/{settlement_id}", get(get_settlement))
        .route("/admin/settlements/{settlement_id}/process", post(process_settlement))
}

// =============================================================================
// Commission
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SaveCommissionRequest {
    pub name: String,
    pub tiers: Vec<CommissionTier>,
    #[serde(default)]
    pub make_default: bool,
}

async fn list_commission_configs(
    State(state): State<SharedState>,
    OperatorCaller(_): OperatorCaller,
) -> ApiResult<Json<Vec<CommissionConfig>>> {
    Ok(Json(state.engine.commission.list().await?))
}

async fn save_commission_config(
    State(state): State<SharedState>,
    OperatorCaller(actor): OperatorCaller,
    ApiJson(req): ApiJson<SaveCommissionRequest>,
) -> ApiResult<Json<CommissionConfig>> {
    Ok(Json(
        state
            .engine
            .commission
            .save_config(&actor, &req.name, req.tiers, req.make_default)
            .await?,
    ))
}

async fn set_default_config(
    State(state): State<SharedState>,
    OperatorCaller(actor): OperatorCaller,
    Path(config_id): Path<String>,
) -> ApiResult<Json<CommissionConfig>> {
    Ok(Json(state.engine.commission.set_default(&actor, &config_id).await?))
}

// =============================================================================
// Discounts
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub supersede: bool,
}

async fn list_pending_discounts(
    State(state): State<SharedState>,
    OperatorCaller(_): OperatorCaller,
) -> ApiResult<Json<Vec<Discount>>> {
    Ok(Json(state.engine.discounts.list_pending().await?))
}

async fn approve_discount(
    State(state): State<SharedState>,
    OperatorCaller(actor): OperatorCaller,
    Path(discount_id): Path<String>,
    ApiJson(req): ApiJson<ApproveRequest>,
) -> ApiResult<Json<Discount>> {
    Ok(Json(
        state
            .engine
            .discounts
            .approve(&actor, &discount_id, req.supersede)
            .await?,
    ))
}

async fn disable_discount(
    State(state): State<SharedState>,
    OperatorCaller(actor): OperatorCaller,
    Path(discount_id): Path<String>,
) -> ApiResult<Json<Discount>> {
    Ok(Json(state.engine.discounts.disable(&actor, &discount_id).await?))
}

async fn list_limits(
    State(state): State<SharedState>,
    OperatorCaller(_): OperatorCaller,
) -> ApiResult<Json<Vec<DiscountLimit>>> {
    Ok(Json(state.engine.discounts.limits().await?))
}

async fn set_limit(
    State(state): State<SharedState>,
    OperatorCaller(actor): OperatorCaller,
    ApiJson(limit): ApiJson<DiscountLimit>,
) -> ApiResult<Json<DiscountLimit>> {
    Ok(Json(state.engine.discounts.set_limit(&actor, limit).await?))
}

// =============================================================================
// Assignment
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct AssignRequest {
    /// Omitted: pick the next eligible partner for the category.
    pub partner_id: Option<String>,
}

async fn assign_partner(
    State(state): State<SharedState>,
    OperatorCaller(actor): OperatorCaller,
    Path(order_id): Path<String>,
    ApiJson(req): ApiJson<AssignRequest>,
) -> ApiResult<Json<Order>> {
    Ok(Json(
        state
            .engine
            .orders
            .assign_partner(&order_id, &actor, req.partner_id.as_deref())
            .await?,
    ))
}

// =============================================================================
// Settlements
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct GenerateSettlementRequest {
    pub partner_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

async fn generate_settlement(
    State(state): State<SharedState>,
    OperatorCaller(_): OperatorCaller,
    ApiJson(req): ApiJson<GenerateSettlementRequest>,
) -> ApiResult<(StatusCode, Json<Settlement>)> {
    let period = SettlementPeriod::new(req.start, req.end).map_err(EngineError::from)?;
    let settlement = state
        .engine
        .settlements
        .generate_settlement(&req.partner_id, period)
        .await?;
    Ok((StatusCode::CREATED, Json(settlement)))
}

async fn get_settlement(
    State(state): State<SharedState>,
    OperatorCaller(_): OperatorCaller,
    Path(settlement_id): Path<String>,
) -> ApiResult<Json<Settlement>> {
    Ok(Json(state.engine.settlements.get(&settlement_id).await?))
}

async fn process_settlement(
    State(state): State<SharedState>,
    OperatorCaller(_): OperatorCaller,
    Path(settlement_id): Path<String>,
) -> ApiResult<Json<Settlement>> {
    Ok(Json(state.engine.settlements.process_settlement(&settlement_id).await?))
}
