//! # Client Routes
//!
//! Cart, address book, checkout and the gateway's payment confirmation.
//!
//! ## Checkout Flow
//! ```text
//! POST /cart/items ──► GET /cart/validation ──► POST /checkout
//!                                                   │ order PENDING_PAYMENT
//!                                                   │ + gateway_order_id
//!                                                   ▼
//!                                         client pays at the gateway
//!                                                   │
//!                                                   ▼
//!                                         POST /payments/confirm
//!                                           order CONFIRMED → PENDING_ACCEPTANCE
//! ```

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::debug;

use merchflow_core::cart::CartValidation;
use merchflow_core::order::{Order, PaymentConfirmation};
use merchflow_core::types::{Address, DeliveryOption, ShippingAddress};
use merchflow_core::validation::validate_address;
use merchflow_engine::{CartView, CheckoutSession, EngineError};

use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery, ClientCaller};
use crate::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/items", post(add_item))
        .route("/cart/items/{item_id}", patch(update_item).delete(remove_item))
        .route("/cart/validation", get(validate_cart))
        .route("/cart/accept-prices", post(accept_prices))
        .route("/addresses", get(list_addresses).post(create_address))
        .route("/addresses/{address_id}", delete(delete_address))
        .route("/checkout", post(checkout))
        .route("/payments/confirm", post(confirm_payment))
}

// =============================================================================
// Cart
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CartQuery {
    #[serde(default)]
    pub delivery_option: DeliveryOption,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub customization_id: Option<String>,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

async fn get_cart(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
    ApiQuery(query): ApiQuery<CartQuery>,
) -> ApiResult<Json<CartView>> {
    debug!(user_id = %user_id, "get_cart");
    Ok(Json(state.engine.carts.view(&user_id, query.delivery_option).await?))
}

async fn add_item(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
    ApiJson(req): ApiJson<AddItemRequest>,
) -> ApiResult<Json<CartView>> {
    let view = state
        .engine
        .carts
        .add_item(&user_id, &req.product_id, req.customization_id.as_deref(), req.quantity)
        .await?;
    Ok(Json(view))
}

async fn update_item(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
    Path(item_id): Path<String>,
    ApiJson(req): ApiJson<UpdateItemRequest>,
) -> ApiResult<Json<CartView>> {
    let view = state
        .engine
        .carts
        .update_quantity(&user_id, &item_id, req.quantity)
        .await?;
    Ok(Json(view))
}

async fn remove_item(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
    Path(item_id): Path<String>,
) -> ApiResult<Json<CartView>> {
    Ok(Json(state.engine.carts.remove_item(&user_id, &item_id).await?))
}

async fn clear_cart(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
) -> ApiResult<Json<CartView>> {
    Ok(Json(state.engine.carts.clear(&user_id).await?))
}

async fn validate_cart(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
) -> ApiResult<Json<CartValidation>> {
    Ok(Json(state.engine.carts.validate_for_checkout(&user_id).await?))
}

async fn accept_prices(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
) -> ApiResult<Json<CartView>> {
    Ok(Json(state.engine.carts.accept_price_changes(&user_id).await?))
}

// =============================================================================
// Addresses
// =============================================================================

async fn list_addresses(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
) -> ApiResult<Json<Vec<Address>>> {
    Ok(Json(state.engine.db.addresses().list(&user_id).await?))
}

async fn create_address(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
    ApiJson(shipping): ApiJson<ShippingAddress>,
) -> ApiResult<(StatusCode, Json<Address>)> {
    validate_address(&shipping).map_err(EngineError::from)?;
    let address = state.engine.db.addresses().create(&user_id, &shipping).await?;
    Ok((StatusCode::CREATED, Json(address)))
}

async fn delete_address(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
    Path(address_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .db
        .addresses()
        .delete_owned(&address_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Checkout and Payment
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub address_id: String,
    #[serde(default)]
    pub delivery_option: DeliveryOption,
}

async fn checkout(
    State(state): State<SharedState>,
    ClientCaller(user_id): ClientCaller,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> ApiResult<(StatusCode, Json<CheckoutSession>)> {
    let mut session = state
        .engine
        .checkout
        .checkout(&user_id, &req.address_id, req.delivery_option)
        .await?;
    session.order = session.order.client_view();
    Ok((StatusCode::CREATED, Json(session)))
}

/// Called by the client or the gateway webhook; the signature is the
/// only credential that matters.
async fn confirm_payment(
    State(state): State<SharedState>,
    ApiJson(confirmation): ApiJson<PaymentConfirmation>,
) -> ApiResult<Json<Order>> {
    let order = state.engine.checkout.confirm_payment(&confirmation).await?;
    Ok(Json(order.client_view()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, send, sign, CLIENT, PARTNER};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_add_item_prices_by_tier() {
        let (app, _) = app().await;
        let (status, view) = send(
            &app,
            Method::POST,
            "/cart/items",
            CLIENT,
            Some(json!({ "product_id": "tee", "quantity": 12 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["lines"].as_array().unwrap().len(), 1);

        let (status, validation) = send(&app, Method::GET, "/cart/validation", CLIENT, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(validation["issues"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_cart_requires_client_role() {
        let (app, _) = app().await;
        let (status, body) = send(&app, Method::GET, "/cart", PARTNER, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let (status, body) = send(&app, Method::GET, "/cart", &[], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_malformed_body_uses_error_shape() {
        let (app, _) = app().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/cart/items",
            CLIENT,
            Some(json!({ "product_id": "tee", "quantity": "many" })),
        )
        .await;
        assert!(status.is_client_error());
        assert_eq!(body["code"], "MALFORMED_REQUEST");
    }

    #[tokio::test]
    async fn test_empty_cart_checkout_is_rejected() {
        let (app, _) = app().await;
        let (_, address) = send(
            &app,
            Method::POST,
            "/addresses",
            CLIENT,
            Some(json!({
                "recipient_name": "Asha Rao",
                "phone": "9876543210",
                "line1": "12 MG Road",
                "line2": null,
                "city": "Bengaluru",
                "state": "Karnataka",
                "postal_code": "560001"
            })),
        )
        .await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/checkout",
            CLIENT,
            Some(json!({ "address_id": address["id"], "delivery_option": "standard" })),
        )
        .await;
        assert_eq!(body["code"], "CART_EMPTY");
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_forged_confirmation_rejected_then_signed_one_paid() {
        let (app, _) = app().await;
        send(
            &app,
            Method::POST,
            "/cart/items",
            CLIENT,
            Some(json!({ "product_id": "tee", "quantity": 2 })),
        )
        .await;
        let (_, address) = send(
            &app,
            Method::POST,
            "/addresses",
            CLIENT,
            Some(json!({
                "recipient_name": "Asha Rao",
                "phone": "9876543210",
                "line1": "12 MG Road",
                "line2": null,
                "city": "Bengaluru",
                "state": "Karnataka",
                "postal_code": "560001"
            })),
        )
        .await;
        let (_, session) = send(
            &app,
            Method::POST,
            "/checkout",
            CLIENT,
            Some(json!({ "address_id": address["id"] })),
        )
        .await;
        let gateway_order_id = session["payment"]["gateway_order_id"].as_str().unwrap();
        assert!(session["order"].get("partner_id").is_none());

        let (status, body) = send(
            &app,
            Method::POST,
            "/payments/confirm",
            &[],
            Some(json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_1",
                "signature": sign(gateway_order_id, "pay_other"),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "PAYMENT_SIGNATURE_MISMATCH");

        let (status, order) = send(
            &app,
            Method::POST,
            "/payments/confirm",
            &[],
            Some(json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_1",
                "signature": sign(gateway_order_id, "pay_1"),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["status"], "PENDING_ACCEPTANCE");
        assert!(order.get("partner_id").is_none());
    }
}
