//! # Checkout Orchestrator
//!
//! Turns a validated cart into a priced order awaiting payment, then confirms
//! or expires that payment.
//!
//! ## Checkout Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Checkout                                        │
//! │                                                                         │
//! │  address owned? ──► cart non-empty? ──► validate_for_checkout          │
//! │        │                                       │                        │
//! │        │                                       ▼                        │
//! │        │                      one partner? ──► price_cart + GST split   │
//! │        │                                       │                        │
//! │        ▼                                       ▼                        │
//! │  PaymentGateway.create_payment_intent (bounded by gateway timeout)     │
//! │                                                │                        │
//! │  ┌─────────────────── one write transaction ───┴──────────────────┐    │
//! │  │ recheck stock ─► insert order (PENDING_PAYMENT) ─► history     │    │
//! │  │ reserve stock ─► insert payment (expires_at = now + window)    │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Confirmation
//! ```text
//! signature ok? ─► payment CREATED ─► capture ─► order CONFIRMED
//!                        │                        consume reservations
//!                        │                        clear cart
//!                        ├── CAPTURED, same payment id ─► replay, order unchanged
//!                        ├── CAPTURED, other payment id ─► PAYMENT_ALREADY_CAPTURED
//!                        └── EXPIRED ─► PAYMENT_EXPIRED + late payment alert
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use merchflow_core::cart::{CartIssue, CartValidation};
use merchflow_core::order::{
    self, Order, OrderItem, OrderPricing, OrderStatus, Payment, PaymentConfirmation, PaymentStatus,
};
use merchflow_core::pricing::PricingEngine;
use merchflow_core::types::{Actor, DeliveryOption};
use merchflow_core::validation::validate_address;
use merchflow_core::CoreError;
use merchflow_db::repository::new_id;
use merchflow_db::Database;

use crate::cart::CartAggregator;
use crate::error::{EngineError, EngineResult};
use crate::orders::OrderStateMachine;
use crate::ports::{Notification, PaymentIntent, Ports};

/// What the client needs to pay for a freshly placed order.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub order: Order,
    pub payment: PaymentIntent,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CheckoutOrchestrator {
    db: Database,
    ports: Ports,
    carts: CartAggregator,
    pricing: PricingEngine,
    orders: OrderStateMachine,
    payment_timeout: chrono::Duration,
    gateway_timeout: Duration,
}

impl CheckoutOrchestrator {
    pub fn new(
        db: Database,
        ports: Ports,
        carts: CartAggregator,
        pricing: PricingEngine,
        orders: OrderStateMachine,
        payment_timeout: chrono::Duration,
        gateway_timeout: Duration,
    ) -> Self {
        CheckoutOrchestrator {
            db,
            ports,
            carts,
            pricing,
            orders,
            payment_timeout,
            gateway_timeout,
        }
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Places an order for the client's cart and opens a payment intent.
    ///
    /// The cart itself is left alone until payment is confirmed.
    pub async fn checkout(
        &self,
        user_id: &str,
        address_id: &str,
        delivery_option: DeliveryOption,
    ) -> EngineResult<CheckoutSession> {
        let now = Utc::now();
        let address = self.db.addresses().get_owned(address_id, user_id).await?;
        validate_address(&address.shipping)?;

        let cart = match self.db.carts().get_for_user(user_id).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Err(CoreError::EmptyCart.into()),
        };

        let evaluation = self.carts.evaluate(&cart, now).await?;
        evaluation.validation.clone().into_result()?;

        let partner_ids: BTreeSet<String> = evaluation
            .lines
            .iter()
            .filter_map(|line| line.product.as_ref().map(|p| p.partner_id.clone()))
            .collect();
        if partner_ids.len() > 1 {
            return Err(CoreError::MultiPartnerCart {
                partner_ids: partner_ids.into_iter().collect(),
            }
            .into());
        }
        let partner_id = partner_ids.into_iter().next();

        let priced = evaluation.priced_lines();
        let totals = self.pricing.price_cart(&priced, delivery_option).rounded();
        let gst = self.pricing.split_gst(totals.gst, &address.shipping.state);

        let mut items = Vec::with_capacity(evaluation.lines.len());
        // tracked products only: product_id -> units to hold
        let mut held: BTreeMap<String, u32> = BTreeMap::new();
        for line in &evaluation.lines {
            let (Some(product), Some(priced)) = (&line.product, &line.priced) else {
                continue;
            };
            if product.track_inventory {
                *held.entry(product.id.clone()).or_default() += line.item.quantity;
            }
            items.push(OrderItem {
                id: new_id(),
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                customization_id: line.item.customization_id.clone(),
                quantity: line.item.quantity,
                original_unit_price: priced.original_unit_price.rounded(),
                discount_rate: priced.discount_rate,
                effective_unit_price: priced.effective_unit_price.rounded(),
                line_total: priced.line_subtotal.rounded(),
            });
        }

        let order = Order {
            id: new_id(),
            order_number: order::generate_order_number(now),
            user_id: user_id.to_string(),
            partner_id,
            status: OrderStatus::PendingPayment,
            production_stage: None,
            delivery_option,
            shipping_address: address.shipping.clone(),
            pricing: OrderPricing {
                original_subtotal: totals.original_subtotal,
                subtotal: totals.subtotal,
                discount_total: totals.total_discount,
                gst_total: totals.gst,
                cgst: gst.cgst,
                sgst: gst.sgst,
                igst: gst.igst,
                delivery_charge: totals.delivery_charge,
                total: totals.total,
            },
            items,
            cancellation: None,
            shipment: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            delivered_at: None,
        };

        let intent = self.create_intent(&order).await?;
        let expires_at = now + self.payment_timeout;
        let payment = Payment {
            id: new_id(),
            order_id: order.id.clone(),
            gateway_order_id: intent.gateway_order_id.clone(),
            gateway_payment_id: None,
            amount: order.pricing.total,
            status: PaymentStatus::Created,
            expires_at,
            created_at: now,
            captured_at: None,
        };

        let mut tx = self.db.begin_write().await?;

        // stock may have moved since validation
        let mut shortfall = CartValidation::default();
        for line in &evaluation.lines {
            let Some(&wanted) = held.get(&line.item.product_id) else {
                continue;
            };
            let available = self
                .db
                .catalog()
                .available_stock_tx(&mut tx, &line.item.product_id)
                .await?;
            if let Some(available) = available {
                if i64::from(wanted) > available {
                    shortfall.push(
                        &line.item,
                        CartIssue::InsufficientStock {
                            requested: line.item.quantity,
                            available: available.max(0),
                        },
                    );
                }
            }
        }
        shortfall.into_result()?;

        let orders = self.db.orders();
        orders.insert_tx(&mut tx, &order).await?;
        orders
            .append_history_tx(
                &mut tx,
                &order.id,
                OrderStatus::PendingPayment,
                Some("order placed"),
                &Actor::Client(user_id.to_string()).label(),
                now,
            )
            .await?;
        for (product_id, quantity) in &held {
            self.db
                .reservations()
                .reserve_tx(&mut tx, &order.id, product_id, *quantity)
                .await?;
        }
        self.db.payments().insert_tx(&mut tx, &payment).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            user_id = %user_id,
            total = %order.pricing.total,
            items = order.items.len(),
            "Order placed, awaiting payment"
        );

        Ok(CheckoutSession {
            order,
            payment: intent,
            expires_at,
        })
    }

    async fn create_intent(&self, order: &Order) -> EngineResult<PaymentIntent> {
        let request = self
            .ports
            .payments
            .create_payment_intent(&order.order_number, order.pricing.total);

        match tokio::time::timeout(self.gateway_timeout, request).await {
            Ok(Ok(intent)) => Ok(intent),
            Ok(Err(e)) => {
                warn!(order_number = %order.order_number, error = %e, "Payment intent failed");
                Err(e)
            }
            Err(_) => {
                warn!(order_number = %order.order_number, "Payment gateway timed out");
                Err(EngineError::GatewayTimeout {
                    operation: "create_payment_intent",
                    secs: self.gateway_timeout.as_secs(),
                })
            }
        }
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    /// Captures a signed gateway confirmation and confirms the order.
    ///
    /// Replaying the same confirmation returns the order unchanged.
    pub async fn confirm_payment(&self, confirmation: &PaymentConfirmation) -> EngineResult<Order> {
        if !self.ports.payments.verify_signature(confirmation) {
            error!(
                gateway_order_id = %confirmation.gateway_order_id,
                gateway_payment_id = %confirmation.gateway_payment_id,
                "Payment signature mismatch"
            );
            return Err(EngineError::PaymentSignatureMismatch {
                gateway_order_id: confirmation.gateway_order_id.clone(),
            });
        }

        let now = Utc::now();
        let orders = self.db.orders();
        let payments = self.db.payments();
        let mut tx = self.db.begin_write().await?;

        let payment = payments
            .get_by_gateway_order_id_tx(&mut tx, &confirmation.gateway_order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", confirmation.gateway_order_id.as_str()))?;

        match payment.status {
            PaymentStatus::Captured => {
                return if payment.gateway_payment_id.as_deref() == Some(confirmation.gateway_payment_id.as_str()) {
                    debug!(order_id = %payment.order_id, "Payment confirmation replayed");
                    orders
                        .get_tx(&mut tx, &payment.order_id)
                        .await?
                        .ok_or_else(|| EngineError::not_found("Order", payment.order_id.as_str()))
                } else {
                    Err(EngineError::PaymentAlreadyCaptured {
                        order_id: payment.order_id,
                    })
                };
            }
            PaymentStatus::Expired => {
                drop(tx);
                return Err(self.late_payment(&payment, confirmation).await);
            }
            PaymentStatus::Created => {}
        }

        if orders.get_tx(&mut tx, &payment.order_id).await?.map(|o| o.status)
            != Some(OrderStatus::PendingPayment)
        {
            drop(tx);
            return Err(self.late_payment(&payment, confirmation).await);
        }
        if payments.captured_for_order_tx(&mut tx, &payment.order_id).await?.is_some() {
            return Err(EngineError::PaymentAlreadyCaptured {
                order_id: payment.order_id,
            });
        }

        if !payments
            .capture_tx(&mut tx, &payment.id, &confirmation.gateway_payment_id, now)
            .await?
        {
            return Err(EngineError::ConcurrentUpdate {
                entity: "Payment",
                id: payment.id,
            });
        }
        if !orders
            .transition_tx(&mut tx, &payment.order_id, OrderStatus::PendingPayment, OrderStatus::Confirmed, now)
            .await?
        {
            return Err(EngineError::ConcurrentUpdate {
                entity: "Order",
                id: payment.order_id,
            });
        }
        let note = format!("payment {} captured", confirmation.gateway_payment_id);
        orders
            .append_history_tx(
                &mut tx,
                &payment.order_id,
                OrderStatus::Confirmed,
                Some(&note),
                &Actor::System.label(),
                now,
            )
            .await?;
        self.db
            .reservations()
            .consume_for_order_tx(&mut tx, &payment.order_id)
            .await?;

        let order = orders
            .get_tx(&mut tx, &payment.order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", payment.order_id.as_str()))?;
        if let Some(cart) = self.db.carts().get_for_user_tx(&mut tx, &order.user_id).await? {
            self.db.carts().clear_tx(&mut tx, &cart.id).await?;
        }
        tx.commit().await?;

        info!(order_id = %order.id, amount = %payment.amount, "Payment captured, order confirmed");
        self.ports
            .notifier
            .notify(Notification::OrderConfirmed {
                order_id: order.id.clone(),
                user_id: order.user_id.clone(),
            })
            .await;

        match self.orders.assign_partner(&order.id, &Actor::System, None).await {
            Ok(assigned) => Ok(assigned),
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Automatic partner assignment failed");
                Ok(order)
            }
        }
    }

    async fn late_payment(&self, payment: &Payment, confirmation: &PaymentConfirmation) -> EngineError {
        error!(
            order_id = %payment.order_id,
            gateway_payment_id = %confirmation.gateway_payment_id,
            "Payment arrived after the order stopped accepting it"
        );
        self.ports
            .notifier
            .notify(Notification::LatePayment {
                order_id: payment.order_id.clone(),
                gateway_payment_id: confirmation.gateway_payment_id.clone(),
            })
            .await;
        EngineError::PaymentExpired {
            order_id: payment.order_id.clone(),
        }
    }

    // =========================================================================
    // Expiry
    // =========================================================================

    /// Fails orders whose payment window closed before `now`.
    ///
    /// Each payment is expired in its own transaction so a confirmation
    /// racing the sweep either wins outright or sees EXPIRED.
    pub async fn expire_payments(&self, now: DateTime<Utc>, limit: u32) -> EngineResult<u32> {
        let expired = self.db.payments().list_expired(now, limit).await?;
        let mut failed = 0;

        for payment in expired {
            let mut tx = self.db.begin_write().await?;
            if !self.db.payments().expire_tx(&mut tx, &payment.id).await? {
                continue;
            }

            let orders = self.db.orders();
            let moved = orders
                .transition_tx(
                    &mut tx,
                    &payment.order_id,
                    OrderStatus::PendingPayment,
                    OrderStatus::PaymentFailed,
                    now,
                )
                .await?;
            if moved {
                orders
                    .append_history_tx(
                        &mut tx,
                        &payment.order_id,
                        OrderStatus::PaymentFailed,
                        Some("payment window expired"),
                        &Actor::System.label(),
                        now,
                    )
                    .await?;
                self.db
                    .reservations()
                    .release_for_order_tx(&mut tx, &payment.order_id)
                    .await?;
            }
            tx.commit().await?;

            if moved {
                failed += 1;
                info!(order_id = %payment.order_id, payment_id = %payment.id, "Payment expired, order failed");
                self.ports
                    .notifier
                    .notify(Notification::PaymentExpired {
                        order_id: payment.order_id.clone(),
                    })
                    .await;
            }
        }

        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        confirmation_for, db, harness, harness_with_gateway, seed_address, seed_product, SlowGateway,
        UnavailableGateway,
    };
    use merchflow_core::{ErrorKind, Money};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_checkout_freezes_prices_and_reserves_stock() {
        let db = db().await;
        let h = harness(&db).await;
        seed_product(&db, "tee", "partner-a", Some(20)).await;
        let address = seed_address(&db, "user-1").await;
        h.engine.carts.add_item("user-1", "tee", None, 10).await.unwrap();

        let session = h
            .engine
            .checkout
            .checkout("user-1", &address.id, DeliveryOption::Standard)
            .await
            .unwrap();

        let order = &session.order;
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.partner_id.as_deref(), Some("partner-a"));
        assert_eq!(order.items[0].effective_unit_price, Money::from_major(100));
        assert_eq!(order.pricing.subtotal, Money::from_major(1000));
        assert_eq!(order.pricing.gst_total, Money::from_major(180));
        // same state as origin: CGST + SGST
        assert_eq!(order.pricing.cgst + order.pricing.sgst, order.pricing.gst_total);
        assert!(order.pricing.igst.is_zero());
        assert_eq!(session.payment.amount, order.pricing.total);

        assert_eq!(db.catalog().available_stock("tee").await.unwrap(), Some(10));
        // the cart survives until payment
        assert_eq!(h.engine.carts.view("user-1", DeliveryOption::Standard).await.unwrap().lines.len(), 1);
    }

    #[tokio::test]
    async fn test_checkout_guards() {
        let db = db().await;
        let h = harness(&db).await;
        let address = seed_address(&db, "user-1").await;

        let err = h
            .engine
            .checkout
            .checkout("user-1", &address.id, DeliveryOption::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CART_EMPTY");

        let err = h
            .engine
            .checkout
            .checkout("user-2", &address.id, DeliveryOption::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        seed_product(&db, "tee", "partner-a", None).await;
        seed_product(&db, "mug", "partner-b", None).await;
        h.engine.carts.add_item("user-1", "tee", None, 1).await.unwrap();
        h.engine.carts.add_item("user-1", "mug", None, 1).await.unwrap();
        let err = h
            .engine
            .checkout
            .checkout("user-1", &address.id, DeliveryOption::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MULTI_PARTNER_CART");
    }

    #[tokio::test]
    async fn test_gateway_failures_leave_no_order() {
        let db = db().await;
        seed_product(&db, "tee", "partner-a", None).await;
        let address = seed_address(&db, "user-1").await;

        let down = harness_with_gateway(&db, Arc::new(UnavailableGateway)).await;
        down.engine.carts.add_item("user-1", "tee", None, 1).await.unwrap();
        let err = down
            .engine
            .checkout
            .checkout("user-1", &address.id, DeliveryOption::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GATEWAY_UNAVAILABLE");
        assert!(err.is_retryable());

        let slow = harness_with_gateway(&db, Arc::new(SlowGateway)).await;
        let err = slow
            .engine
            .checkout
            .checkout("user-1", &address.id, DeliveryOption::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GATEWAY_TIMEOUT");

        assert!(db.orders().list_for_user("user-1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_payment_and_replay() {
        let db = db().await;
        let h = harness(&db).await;
        seed_product(&db, "tee", "partner-a", Some(20)).await;
        let address = seed_address(&db, "user-1").await;
        h.engine.carts.add_item("user-1", "tee", None, 2).await.unwrap();
        let session = h
            .engine
            .checkout
            .checkout("user-1", &address.id, DeliveryOption::Express)
            .await
            .unwrap();

        let confirmation = confirmation_for(&session, "pay_1");
        let order = h.engine.checkout.confirm_payment(&confirmation).await.unwrap();
        // auto-assigned to the cart's partner
        assert_eq!(order.status, OrderStatus::PendingAcceptance);
        assert!(h.engine.carts.view("user-1", DeliveryOption::Standard).await.unwrap().lines.is_empty());
        assert_eq!(db.catalog().get("tee").await.unwrap().unwrap().stock, Some(18));

        let replay = h.engine.checkout.confirm_payment(&confirmation).await.unwrap();
        assert_eq!(replay.status, OrderStatus::PendingAcceptance);
        let history = db.orders().history(&order.id).await.unwrap();
        assert_eq!(
            history.iter().filter(|h| h.status == OrderStatus::Confirmed).count(),
            1
        );

        let other = confirmation_for(&session, "pay_2");
        let err = h.engine.checkout.confirm_payment(&other).await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT_ALREADY_CAPTURED");

        let mut forged = confirmation_for(&session, "pay_3");
        forged.signature = "00".repeat(32);
        let err = h.engine.checkout.confirm_payment(&forged).await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT_SIGNATURE_MISMATCH");
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[tokio::test]
    async fn test_expiry_fails_order_and_rejects_late_payment() {
        let db = db().await;
        let h = harness(&db).await;
        seed_product(&db, "tee", "partner-a", Some(5)).await;
        let address = seed_address(&db, "user-1").await;
        h.engine.carts.add_item("user-1", "tee", None, 5).await.unwrap();
        let session = h
            .engine
            .checkout
            .checkout("user-1", &address.id, DeliveryOption::Standard)
            .await
            .unwrap();
        assert_eq!(db.catalog().available_stock("tee").await.unwrap(), Some(0));

        let later = session.expires_at + chrono::Duration::seconds(1);
        assert_eq!(h.engine.checkout.expire_payments(later, 10).await.unwrap(), 1);
        assert_eq!(h.engine.checkout.expire_payments(later, 10).await.unwrap(), 0);

        let order = db.orders().get(&session.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PaymentFailed);
        assert_eq!(db.catalog().available_stock("tee").await.unwrap(), Some(5));

        let err = h
            .engine
            .checkout
            .confirm_payment(&confirmation_for(&session, "pay_late"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PAYMENT_EXPIRED");
        assert!(h.notifier.sent().iter().any(|n| matches!(n, Notification::LatePayment { .. })));
        assert!(h.notifier.sent().iter().any(|n| matches!(n, Notification::PaymentExpired { .. })));
    }
}
