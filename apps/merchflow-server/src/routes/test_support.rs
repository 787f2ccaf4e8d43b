//! Router fixtures for the route tests.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use merchflow_core::money::Money;
use merchflow_core::types::{PricingTier, Product};
use merchflow_db::{Database, DbConfig, Partner};
use merchflow_engine::ports::HmacPaymentGateway;
use merchflow_engine::{Engine, EngineConfig, Ports};

use crate::extract::{ID_HEADER, ROLE_HEADER};

pub const TEST_SECRET: &str = "route-secret";

pub const CLIENT: &[(&str, &str)] = &[(ROLE_HEADER, "client"), (ID_HEADER, "user-1")];
pub const PARTNER: &[(&str, &str)] = &[(ROLE_HEADER, "partner"), (ID_HEADER, "partner-a")];
pub const OPERATOR: &[(&str, &str)] = &[(ROLE_HEADER, "operator"), (ID_HEADER, "op-1")];

/// Router over a fresh in-memory store with one partner and one
/// untracked product `tee` (1-9 at 150, 10+ at 100).
pub async fn app() -> (Router, Database) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();

    let partner = Partner {
        id: "partner-a".into(),
        name: "Partner A".into(),
        is_active: true,
        created_at: Utc::now(),
    };
    db.partners()
        .upsert(&partner, &[("apparel".to_string(), 10)])
        .await
        .unwrap();

    let product = Product {
        id: "tee".into(),
        name: "Team Tee".into(),
        partner_id: "partner-a".into(),
        category: "apparel".into(),
        tax_category: "6109".into(),
        base_price: Money::from_major(150),
        tiers: vec![
            PricingTier::new(1, Some(9), Money::from_major(150)),
            PricingTier::new(10, None, Money::from_major(100)),
        ],
        is_active: true,
        track_inventory: false,
        stock: None,
        updated_at: Utc::now(),
    };
    db.catalog().upsert(&product).await.unwrap();

    let mut config = EngineConfig::default();
    config.checkout.gateway_key_secret = TEST_SECRET.to_string();
    let ports = Ports::local(&db, &config);
    let engine = Engine::new(db.clone(), config, ports);

    (crate::router(engine), db)
}

/// Sends one request and returns the status plus the JSON body
/// (`Value::Null` for an empty body).
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub fn sign(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    HmacPaymentGateway::new(TEST_SECRET).sign(gateway_order_id, gateway_payment_id)
}

/// Adds `quantity` tees, saves an address, checks out and confirms.
/// Returns the paid order's id.
pub async fn paid_order(app: &Router, quantity: u32) -> String {
    let (status, _) = send(
        app,
        Method::POST,
        "/cart/items",
        CLIENT,
        Some(serde_json::json!({ "product_id": "tee", "quantity": quantity })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, address) = send(
        app,
        Method::POST,
        "/addresses",
        CLIENT,
        Some(serde_json::json!({
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
    assert_eq!(status, StatusCode::CREATED);

    let (status, session) = send(
        app,
        Method::POST,
        "/checkout",
        CLIENT,
        Some(serde_json::json!({
            "address_id": address["id"],
            "delivery_option": "standard"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let gateway_order_id = session["payment"]["gateway_order_id"].as_str().unwrap().to_string();
    let (status, order) = send(
        app,
        Method::POST,
        "/payments/confirm",
        &[],
        Some(serde_json::json!({
            "gateway_order_id": gateway_order_id,
            "gateway_payment_id": "pay_route_1",
            "signature": sign(&gateway_order_id, "pay_route_1"),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    order["id"].as_str().unwrap().to_string()
}
