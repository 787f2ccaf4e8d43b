//! Fixtures and port doubles shared by the engine tests.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use merchflow_core::money::Money;
use merchflow_core::order::{Order, OrderItem, OrderPricing, OrderStatus, PaymentConfirmation};
use merchflow_core::settlement::Settlement;
use merchflow_core::types::{Actor, Address, DeliveryOption, PricingTier, Product, ShippingAddress};
use merchflow_db::repository::new_id;
use merchflow_db::{Database, DbConfig, Partner};

use crate::checkout::CheckoutSession;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ports::{HmacPaymentGateway, Notification, Notifier, PaymentGateway, PaymentIntent, PayoutGateway, Ports};
use crate::Engine;

pub const TEST_SECRET: &str = "test-secret";

pub async fn db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub fn operator() -> Actor {
    Actor::Operator("op-1".to_string())
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.checkout.gateway_key_secret = TEST_SECRET.to_string();
    config.checkout.gateway_timeout_secs = 1;
    config
}

// =============================================================================
// Seeds
// =============================================================================

/// Tiers: 1-9 at 150, 10+ at 100. Stock is tracked when given.
pub async fn seed_product(db: &Database, id: &str, partner_id: &str, stock: Option<i64>) -> Product {
    seed_partner(db, partner_id).await;
    let product = Product {
        id: id.into(),
        name: format!("Product {}", id),
        partner_id: partner_id.into(),
        category: "apparel".into(),
        tax_category: "6109".into(),
        base_price: Money::from_major(150),
        tiers: vec![
            PricingTier::new(1, Some(9), Money::from_major(150)),
            PricingTier::new(10, None, Money::from_major(100)),
        ],
        is_active: true,
        track_inventory: stock.is_some(),
        stock,
        updated_at: Utc::now(),
    };
    db.catalog().upsert(&product).await.unwrap();
    product
}

pub async fn seed_partner(db: &Database, id: &str) {
    let partner = Partner {
        id: id.into(),
        name: format!("Partner {}", id),
        is_active: true,
        created_at: Utc::now(),
    };
    db.partners()
        .upsert(&partner, &[("apparel".to_string(), 10)])
        .await
        .unwrap();
}

/// Same state as the default origin, so GST splits into CGST + SGST.
pub async fn seed_address(db: &Database, user_id: &str) -> Address {
    let shipping = ShippingAddress {
        recipient_name: "Asha Rao".into(),
        phone: "9876543210".into(),
        line1: "12 MG Road".into(),
        line2: None,
        city: "Bengaluru".into(),
        state: "Karnataka".into(),
        postal_code: "560001".into(),
    };
    db.addresses().create(user_id, &shipping).await.unwrap()
}

/// Inserts a DELIVERED order for `partner_id` worth `total` whole units.
pub async fn delivered_order(db: &Database, partner_id: &str, total: i64) -> Order {
    let now = Utc::now();
    let total = Money::from_major(total);
    let order = Order {
        id: new_id(),
        order_number: merchflow_core::order::generate_order_number(now),
        user_id: "user-1".into(),
        partner_id: Some(partner_id.into()),
        status: OrderStatus::Shipped,
        production_stage: None,
        delivery_option: DeliveryOption::Standard,
        shipping_address: seed_address(db, "user-1").await.shipping,
        pricing: OrderPricing {
            original_subtotal: total,
            subtotal: total,
            discount_total: Money::zero(),
            gst_total: Money::zero(),
            cgst: Money::zero(),
            sgst: Money::zero(),
            igst: Money::zero(),
            delivery_charge: Money::zero(),
            total,
        },
        items: vec![OrderItem {
            id: new_id(),
            product_id: "tee".into(),
            product_name: "Team Tee".into(),
            customization_id: None,
            quantity: 1,
            original_unit_price: total,
            discount_rate: None,
            effective_unit_price: total,
            line_total: total,
        }],
        cancellation: None,
        shipment: None,
        created_at: now,
        updated_at: now,
        confirmed_at: None,
        delivered_at: None,
    };

    let mut tx = db.begin_write().await.unwrap();
    db.orders().insert_tx(&mut tx, &order).await.unwrap();
    assert!(db
        .orders()
        .transition_tx(&mut tx, &order.id, OrderStatus::Shipped, OrderStatus::Delivered, now)
        .await
        .unwrap());
    tx.commit().await.unwrap();
    db.orders().get(&order.id).await.unwrap().unwrap()
}

// =============================================================================
// Port Doubles
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

/// Refuses every intent.
pub struct UnavailableGateway;

#[async_trait]
impl PaymentGateway for UnavailableGateway {
    async fn create_payment_intent(&self, _order_number: &str, _amount: Money) -> EngineResult<PaymentIntent> {
        Err(EngineError::GatewayUnavailable {
            operation: "create_payment_intent",
            reason: "503 from gateway".into(),
        })
    }

    fn verify_signature(&self, confirmation: &PaymentConfirmation) -> bool {
        HmacPaymentGateway::new(TEST_SECRET).verify_signature(confirmation)
    }
}

/// Never answers within the test gateway timeout.
pub struct SlowGateway;

#[async_trait]
impl PaymentGateway for SlowGateway {
    async fn create_payment_intent(&self, order_number: &str, amount: Money) -> EngineResult<PaymentIntent> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        HmacPaymentGateway::new(TEST_SECRET)
            .create_payment_intent(order_number, amount)
            .await
    }

    fn verify_signature(&self, confirmation: &PaymentConfirmation) -> bool {
        HmacPaymentGateway::new(TEST_SECRET).verify_signature(confirmation)
    }
}

pub struct FailingPayouts;

#[async_trait]
impl PayoutGateway for FailingPayouts {
    async fn pay_out(&self, _settlement: &Settlement) -> EngineResult<String> {
        Err(EngineError::GatewayUnavailable {
            operation: "pay_out",
            reason: "bank rejected transfer".into(),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub engine: Engine,
    pub notifier: Arc<RecordingNotifier>,
}

/// Engine over `db` with local ports and a log-only notifier.
pub fn engine_with(db: &Database) -> Engine {
    let config = config();
    let ports = Ports::local(db, &config);
    Engine::new(db.clone(), config, ports)
}

fn build(db: &Database, customize: impl FnOnce(&mut Ports)) -> Harness {
    let config = config();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut ports = Ports::local(db, &config);
    ports.notifier = notifier.clone();
    customize(&mut ports);
    Harness {
        engine: Engine::new(db.clone(), config, ports),
        notifier,
    }
}

pub async fn harness(db: &Database) -> Harness {
    build(db, |_| {})
}

pub async fn harness_with_gateway(db: &Database, gateway: Arc<dyn PaymentGateway>) -> Harness {
    build(db, |ports| ports.payments = gateway)
}

pub async fn harness_with_payouts(db: &Database, payouts: Arc<dyn PayoutGateway>) -> Harness {
    build(db, |ports| ports.payouts = payouts)
}

/// A correctly signed gateway confirmation for the session.
pub fn confirmation_for(session: &CheckoutSession, gateway_payment_id: &str) -> PaymentConfirmation {
    let gateway_order_id = session.payment.gateway_order_id.clone();
    PaymentConfirmation {
        signature: HmacPaymentGateway::new(TEST_SECRET).sign(&gateway_order_id, gateway_payment_id),
        gateway_order_id,
        gateway_payment_id: gateway_payment_id.to_string(),
    }
}

/// Checks out `quantity` of the partner's tee and confirms payment. The
/// order comes back PENDING_ACCEPTANCE with `partner_id`.
pub async fn paid_order(h: &Harness, user_id: &str, partner_id: &str, quantity: u32) -> Order {
    let db = &h.engine.db;
    let product_id = format!("{}-tee", partner_id);
    seed_product(db, &product_id, partner_id, None).await;
    let address = seed_address(db, user_id).await;

    h.engine
        .carts
        .add_item(user_id, &product_id, None, quantity)
        .await
        .unwrap();
    let session = h
        .engine
        .checkout
        .checkout(user_id, &address.id, DeliveryOption::Standard)
        .await
        .unwrap();
    let id = format!("pay_{}", new_id());
    h.engine
        .checkout
        .confirm_payment(&confirmation_for(&session, &id))
        .await
        .unwrap()
}
