//! # Order State Machine
//!
//! Every status change after payment: partner assignment, acceptance,
//! production, shipping, delivery and cancellation.
//!
//! ```text
//! CONFIRMED ──assign──► PENDING_ACCEPTANCE ──accept──► ACCEPTED
//!                         │        ▲                      │ first stage update
//!                  reject │        │ operator reassign    ▼
//!                         ▼        │                 IN_PRODUCTION ──► SHIPPED ──► DELIVERED
//!                    PARTNER_REJECTED
//!
//! cancel: by actor and status, see `can_cancel`; refund decided by `compute_refund`
//! ```
//!
//! Each change is a conditional update on the status that was read, plus an
//! immutable history row, in one write transaction. A lost race surfaces as
//! `CONCURRENT_UPDATE` rather than a silent overwrite.

use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};

use merchflow_core::order::{
    self, AssignmentStatus, Cancellation, Order, OrderStatus, OrderStatusHistory, ProductionStage, RefundDecision,
    RefundPolicy, Shipment,
};
use merchflow_core::types::Actor;
use merchflow_core::validation::{validate_reason, validate_text};
use merchflow_core::CoreError;
use merchflow_db::Database;

use crate::error::{EngineError, EngineResult};
use crate::ports::{Notification, Ports};

const MAX_TRACKING_LEN: usize = 100;

#[derive(Clone)]
pub struct OrderStateMachine {
    db: Database,
    ports: Ports,
    refund_policy: RefundPolicy,
}

impl OrderStateMachine {
    pub fn new(db: Database, ports: Ports, refund_policy: RefundPolicy) -> Self {
        OrderStateMachine {
            db,
            ports,
            refund_policy,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Loads an order the actor is allowed to see. Others get NOT_FOUND.
    ///
    /// Clients never see which partner holds the order.
    pub async fn get_order(&self, order_id: &str, actor: &Actor) -> EngineResult<Order> {
        let order = self.load_visible(order_id, actor).await?;
        Ok(redact_for(actor, order))
    }

    async fn load_visible(&self, order_id: &str, actor: &Actor) -> EngineResult<Order> {
        let orders = self.db.orders();
        match actor {
            Actor::Client(user_id) => Ok(orders.get_owned(order_id, user_id).await?),
            Actor::Partner(partner_id) => Ok(orders.get_for_partner(order_id, partner_id).await?),
            Actor::Operator(_) | Actor::System => orders
                .get(order_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Order", order_id)),
        }
    }

    /// Orders visible to the actor, newest first.
    ///
    /// Operators without a status filter get the PARTNER_REJECTED queue.
    pub async fn list_orders(
        &self,
        actor: &Actor,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> EngineResult<Vec<Order>> {
        let orders = self.db.orders();
        let mut list = match actor {
            Actor::Client(user_id) => orders.list_for_user(user_id, limit).await?,
            Actor::Partner(partner_id) => orders.list_for_partner(partner_id, limit).await?,
            Actor::Operator(_) | Actor::System => match status {
                Some(status) => return Ok(orders.list_by_status(status, limit).await?),
                None => orders.list_by_status(OrderStatus::PartnerRejected, limit).await?,
            },
        };
        if let Some(status) = status {
            list.retain(|o| o.status == status);
        }
        Ok(list.into_iter().map(|o| redact_for(actor, o)).collect())
    }

    /// Status history, oldest first. Internal notes are hidden from clients.
    pub async fn history(&self, order_id: &str, actor: &Actor) -> EngineResult<Vec<OrderStatusHistory>> {
        self.load_visible(order_id, actor).await?;
        let mut history = self.db.orders().history(order_id).await?;
        if matches!(actor, Actor::Client(_)) {
            for row in &mut history {
                row.note = None;
            }
        }
        Ok(history)
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Offers a CONFIRMED or PARTNER_REJECTED order to a partner.
    ///
    /// With no partner given, the order's own partner is tried first, then
    /// the category's partners in registry order, skipping anyone who has
    /// already rejected it.
    pub async fn assign_partner(
        &self,
        order_id: &str,
        actor: &Actor,
        partner_id: Option<&str>,
    ) -> EngineResult<Order> {
        let order = self.load_visible(order_id, &Actor::System).await?;
        order::ensure_transition(order_id, order.status, OrderStatus::PendingAcceptance)?;

        let rejected: HashSet<String> = self
            .db
            .orders()
            .assignments(order_id)
            .await?
            .into_iter()
            .filter(|a| a.status == AssignmentStatus::Rejected)
            .map(|a| a.partner_id)
            .collect();

        let partner_id = match partner_id {
            Some(explicit) => {
                if self.db.partners().get(explicit).await?.is_none() {
                    return Err(EngineError::not_found("Partner", explicit));
                }
                explicit.to_string()
            }
            None => self.pick_partner(&order, &rejected).await?,
        };

        let now = Utc::now();
        let orders = self.db.orders();
        let mut tx = self.db.begin_write().await?;
        if !orders
            .transition_tx(&mut tx, order_id, order.status, OrderStatus::PendingAcceptance, now)
            .await?
        {
            return Err(EngineError::ConcurrentUpdate {
                entity: "Order",
                id: order_id.to_string(),
            });
        }
        orders.insert_assignment_tx(&mut tx, order_id, &partner_id, now).await?;
        orders.set_partner_tx(&mut tx, order_id, &partner_id).await?;
        let note = format!("offered to partner {}", partner_id);
        orders
            .append_history_tx(
                &mut tx,
                order_id,
                OrderStatus::PendingAcceptance,
                Some(&note),
                &actor.label(),
                now,
            )
            .await?;
        let updated = orders
            .get_tx(&mut tx, order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;
        tx.commit().await?;

        info!(order_id = %order_id, partner_id = %partner_id, actor = %actor.label(), "Order offered to partner");
        Ok(updated)
    }

    async fn pick_partner(&self, order: &Order, rejected: &HashSet<String>) -> EngineResult<String> {
        if let Some(current) = &order.partner_id {
            if !rejected.contains(current) {
                return Ok(current.clone());
            }
        }

        let no_partner = || EngineError::NoPartnerAvailable {
            order_id: order.id.clone(),
        };
        let first_item = order.items.first().ok_or_else(no_partner)?;
        let product = self
            .ports
            .catalog
            .get_product(&first_item.product_id)
            .await?
            .ok_or_else(no_partner)?;

        self.ports
            .partners
            .partners_for_category(&product.category)
            .await?
            .into_iter()
            .find(|p| !rejected.contains(p))
            .ok_or_else(no_partner)
    }

    /// Partner takes the order offered to them.
    pub async fn accept_order(&self, order_id: &str, partner_id: &str) -> EngineResult<Order> {
        let order = self.db.orders().get_for_partner(order_id, partner_id).await?;
        order::ensure_transition(order_id, order.status, OrderStatus::Accepted)?;
        let actor = Actor::Partner(partner_id.to_string());

        let now = Utc::now();
        let orders = self.db.orders();
        let mut tx = self.db.begin_write().await?;
        self.respond(&mut tx, order_id, partner_id, AssignmentStatus::Accepted, None, now)
            .await?;
        self.advance(&mut tx, order_id, order.status, OrderStatus::Accepted, None, &actor, now)
            .await?;
        let updated = orders
            .get_tx(&mut tx, order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;
        tx.commit().await?;

        info!(order_id = %order_id, partner_id = %partner_id, "Order accepted");
        Ok(updated)
    }

    /// Partner declines the order. Operators are alerted; nothing is retried.
    pub async fn reject_order(&self, order_id: &str, partner_id: &str, reason: &str) -> EngineResult<Order> {
        validate_reason(reason)?;
        let order = self.db.orders().get_for_partner(order_id, partner_id).await?;
        order::ensure_transition(order_id, order.status, OrderStatus::PartnerRejected)?;
        let actor = Actor::Partner(partner_id.to_string());

        let now = Utc::now();
        let mut tx = self.db.begin_write().await?;
        self.respond(&mut tx, order_id, partner_id, AssignmentStatus::Rejected, Some(reason), now)
            .await?;
        self.advance(
            &mut tx,
            order_id,
            order.status,
            OrderStatus::PartnerRejected,
            Some(reason),
            &actor,
            now,
        )
        .await?;
        let updated = self
            .db
            .orders()
            .get_tx(&mut tx, order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;
        tx.commit().await?;

        warn!(order_id = %order_id, partner_id = %partner_id, reason = %reason, "Partner rejected order");
        self.ports
            .notifier
            .notify(Notification::PartnerRejected {
                order_id: order_id.to_string(),
                partner_id: partner_id.to_string(),
                reason: reason.to_string(),
            })
            .await;
        Ok(updated)
    }

    // =========================================================================
    // Fulfilment
    // =========================================================================

    /// Records forward production progress. The first update starts production.
    pub async fn update_production(
        &self,
        order_id: &str,
        partner_id: &str,
        stage: ProductionStage,
    ) -> EngineResult<Order> {
        let order = self.db.orders().get_for_partner(order_id, partner_id).await?;
        match order.status {
            OrderStatus::Accepted | OrderStatus::InProduction => {}
            current => {
                return Err(CoreError::InvalidTransition {
                    order_id: order_id.to_string(),
                    current,
                    requested: OrderStatus::InProduction,
                }
                .into())
            }
        }
        order::ensure_stage_progress(order.production_stage, stage)?;
        let actor = Actor::Partner(partner_id.to_string());

        let now = Utc::now();
        let orders = self.db.orders();
        let mut tx = self.db.begin_write().await?;
        if order.status == OrderStatus::Accepted {
            let note = format!("production {}", stage);
            self.advance(
                &mut tx,
                order_id,
                OrderStatus::Accepted,
                OrderStatus::InProduction,
                Some(&note),
                &actor,
                now,
            )
            .await?;
        }
        if !orders
            .set_stage_tx(&mut tx, order_id, order.production_stage, stage)
            .await?
        {
            return Err(EngineError::ConcurrentUpdate {
                entity: "Order",
                id: order_id.to_string(),
            });
        }
        let updated = orders
            .get_tx(&mut tx, order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;
        tx.commit().await?;

        info!(order_id = %order_id, stage = %stage, "Production updated");
        Ok(updated)
    }

    pub async fn mark_shipped(
        &self,
        order_id: &str,
        partner_id: &str,
        courier: &str,
        tracking_number: &str,
    ) -> EngineResult<Order> {
        validate_text("courier", courier, MAX_TRACKING_LEN)?;
        validate_text("tracking_number", tracking_number, MAX_TRACKING_LEN)?;
        let order = self.db.orders().get_for_partner(order_id, partner_id).await?;
        order::ensure_transition(order_id, order.status, OrderStatus::Shipped)?;
        let actor = Actor::Partner(partner_id.to_string());

        let now = Utc::now();
        let shipment = Shipment {
            courier: courier.trim().to_string(),
            tracking_number: tracking_number.trim().to_string(),
            shipped_at: now,
        };
        let orders = self.db.orders();
        let mut tx = self.db.begin_write().await?;
        let note = format!("{} {}", shipment.courier, shipment.tracking_number);
        self.advance(&mut tx, order_id, order.status, OrderStatus::Shipped, Some(&note), &actor, now)
            .await?;
        orders.set_shipment_tx(&mut tx, order_id, &shipment).await?;
        let updated = orders
            .get_tx(&mut tx, order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;
        tx.commit().await?;

        info!(order_id = %order_id, courier = %shipment.courier, "Order shipped");
        Ok(updated)
    }

    /// SHIPPED → DELIVERED, by the shipping partner or an operator.
    pub async fn mark_delivered(&self, order_id: &str, actor: &Actor) -> EngineResult<Order> {
        if matches!(actor, Actor::Client(_)) {
            return Err(EngineError::not_found("Order", order_id));
        }
        let order = self.load_visible(order_id, actor).await?;
        order::ensure_transition(order_id, order.status, OrderStatus::Delivered)?;

        let now = Utc::now();
        let mut tx = self.db.begin_write().await?;
        self.advance(&mut tx, order_id, order.status, OrderStatus::Delivered, None, actor, now)
            .await?;
        let updated = self
            .db
            .orders()
            .get_tx(&mut tx, order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;
        tx.commit().await?;

        info!(order_id = %order_id, "Order delivered");
        Ok(updated)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancels the order and records the refund owed.
    pub async fn cancel(&self, order_id: &str, actor: &Actor, reason: &str) -> EngineResult<RefundDecision> {
        validate_reason(reason)?;
        let order = self.load_visible(order_id, actor).await?;
        if !order::can_cancel(order.status, actor) {
            return Err(CoreError::NotCancellable {
                order_id: order_id.to_string(),
                current: order.status,
            }
            .into());
        }

        let now = Utc::now();
        let refund = order::compute_refund(order_id, order.pricing.total, order.status, &self.refund_policy, now)?;
        let cancellation = Cancellation {
            reason: reason.trim().to_string(),
            cancelled_by: actor.label(),
            cancelled_at: now,
            refund: refund.clone(),
        };

        let mut tx = self.db.begin_write().await?;
        self.advance(
            &mut tx,
            order_id,
            order.status,
            OrderStatus::Cancelled,
            Some(&cancellation.reason),
            actor,
            now,
        )
        .await?;
        self.db
            .orders()
            .set_cancellation_tx(&mut tx, order_id, &cancellation)
            .await?;
        let reservations = self.db.reservations();
        reservations.release_for_order_tx(&mut tx, order_id).await?;
        reservations.restock_for_order_tx(&mut tx, order_id).await?;
        tx.commit().await?;

        info!(
            order_id = %order_id,
            from = %order.status,
            actor = %actor.label(),
            refund = %refund.refund_amount,
            deduction = %refund.deduction_amount,
            "Order cancelled"
        );
        self.ports
            .notifier
            .notify(Notification::OrderCancelled {
                order_id: order_id.to_string(),
                refund: refund.refund_amount,
            })
            .await;
        Ok(refund)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn advance(
        &self,
        conn: &mut sqlx::SqliteConnection,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        note: Option<&str>,
        actor: &Actor,
        now: chrono::DateTime<Utc>,
    ) -> EngineResult<()> {
        let orders = self.db.orders();
        if !orders.transition_tx(conn, order_id, from, to, now).await? {
            return Err(EngineError::ConcurrentUpdate {
                entity: "Order",
                id: order_id.to_string(),
            });
        }
        orders
            .append_history_tx(conn, order_id, to, note, &actor.label(), now)
            .await?;
        Ok(())
    }

    async fn respond(
        &self,
        conn: &mut sqlx::SqliteConnection,
        order_id: &str,
        partner_id: &str,
        status: AssignmentStatus,
        reason: Option<&str>,
        now: chrono::DateTime<Utc>,
    ) -> EngineResult<()> {
        let responded = self
            .db
            .orders()
            .respond_assignment_tx(conn, order_id, partner_id, status, reason, now)
            .await?;
        if responded {
            Ok(())
        } else {
            Err(EngineError::NoOpenAssignment {
                order_id: order_id.to_string(),
            })
        }
    }
}

fn redact_for(actor: &Actor, order: Order) -> Order {
    match actor {
        Actor::Client(_) => order.client_view(),
        _ => order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        confirmation_for, db, harness, operator, paid_order, seed_address, seed_partner, seed_product,
    };
    use merchflow_core::types::DeliveryOption;
    use merchflow_core::order::RefundMethod;
    use merchflow_core::{ErrorKind, Money};

    fn partner(id: &str) -> Actor {
        Actor::Partner(id.to_string())
    }

    #[tokio::test]
    async fn test_happy_path_to_delivery() {
        let db = db().await;
        let h = harness(&db).await;
        let order = paid_order(&h, "user-1", "partner-a", 2).await;
        assert_eq!(order.status, OrderStatus::PendingAcceptance);
        let orders = &h.engine.orders;

        orders.accept_order(&order.id, "partner-a").await.unwrap();
        let o = orders
            .update_production(&order.id, "partner-a", ProductionStage::Started)
            .await
            .unwrap();
        assert_eq!(o.status, OrderStatus::InProduction);
        orders
            .update_production(&order.id, "partner-a", ProductionStage::Packed)
            .await
            .unwrap();
        let err = orders
            .update_production(&order.id, "partner-a", ProductionStage::Printing)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PRODUCTION_REGRESSION");

        let o = orders
            .mark_shipped(&order.id, "partner-a", "BlueDart", "BD123")
            .await
            .unwrap();
        assert_eq!(o.shipment.unwrap().tracking_number, "BD123");
        let o = orders.mark_delivered(&order.id, &partner("partner-a")).await.unwrap();
        assert_eq!(o.status, OrderStatus::Delivered);
        assert!(o.delivered_at.is_some());

        let statuses: Vec<_> = orders
            .history(&order.id, &operator())
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::PendingPayment,
                OrderStatus::Confirmed,
                OrderStatus::PendingAcceptance,
                OrderStatus::Accepted,
                OrderStatus::InProduction,
                OrderStatus::Shipped,
                OrderStatus::Delivered,
            ]
        );
    }

    #[tokio::test]
    async fn test_rejection_and_reassignment() {
        let db = db().await;
        let h = harness(&db).await;
        seed_partner(&db, "partner-b").await;
        let order = paid_order(&h, "user-1", "partner-a", 1).await;
        let orders = &h.engine.orders;

        let o = orders.reject_order(&order.id, "partner-a", "Out of blanks").await.unwrap();
        assert_eq!(o.status, OrderStatus::PartnerRejected);
        assert!(h
            .notifier
            .sent()
            .iter()
            .any(|n| matches!(n, Notification::PartnerRejected { .. })));

        // the rejected offer is closed
        let err = orders.accept_order(&order.id, "partner-a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let o = orders.assign_partner(&order.id, &operator(), None).await.unwrap();
        assert_eq!(o.status, OrderStatus::PendingAcceptance);
        assert_eq!(o.partner_id.as_deref(), Some("partner-b"));

        orders.reject_order(&order.id, "partner-b", "Machine down").await.unwrap();
        let err = orders.assign_partner(&order.id, &operator(), None).await.unwrap_err();
        assert_eq!(err.code(), "NO_PARTNER_AVAILABLE");

        let history = orders.history(&order.id, &Actor::Client("user-1".into())).await.unwrap();
        assert!(history.iter().all(|h| h.note.is_none()));
    }

    #[tokio::test]
    async fn test_visibility_is_scoped() {
        let db = db().await;
        let h = harness(&db).await;
        let order = paid_order(&h, "user-1", "partner-a", 1).await;
        let orders = &h.engine.orders;

        let seen = orders.get_order(&order.id, &Actor::Client("user-1".into())).await.unwrap();
        assert!(seen.partner_id.is_none());
        let listed = orders
            .list_orders(&Actor::Client("user-1".into()), None, 10)
            .await
            .unwrap();
        assert!(listed.iter().all(|o| o.partner_id.is_none()));
        let held = orders.get_order(&order.id, &operator()).await.unwrap();
        assert_eq!(held.partner_id.as_deref(), Some("partner-a"));

        let err = orders
            .get_order(&order.id, &Actor::Client("user-2".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = orders.accept_order(&order.id, "partner-z").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_cancellation_refunds() {
        let db = db().await;
        let h = harness(&db).await;
        let orders = &h.engine.orders;

        let order = paid_order(&h, "user-1", "partner-a", 2).await;
        let refund = orders
            .cancel(&order.id, &Actor::Client("user-1".into()), "Changed my mind")
            .await
            .unwrap();
        assert_eq!(refund.refund_amount, order.pricing.total);
        assert_eq!(refund.refund_method, RefundMethod::OriginalPaymentMethod);
        let cancelled = db.orders().get(&order.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.cancellation.unwrap().cancelled_by, "client:user-1");

        let order = paid_order(&h, "user-1", "partner-a", 2).await;
        orders.accept_order(&order.id, "partner-a").await.unwrap();
        orders
            .update_production(&order.id, "partner-a", ProductionStage::Started)
            .await
            .unwrap();
        let err = orders
            .cancel(&order.id, &Actor::Client("user-1".into()), "Too slow")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ORDER_NOT_CANCELLABLE");
        assert_eq!(err.current_status(), Some(OrderStatus::InProduction));

        let refund = orders.cancel(&order.id, &operator(), "Defective batch").await.unwrap();
        assert_eq!(refund.refund_amount + refund.deduction_amount, order.pricing.total);
        assert!(refund.deduction_amount > Money::zero());

        let err = orders
            .cancel(&order.id, &partner("partner-a"), "Cannot make it")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ORDER_NOT_CANCELLABLE");
    }

    #[tokio::test]
    async fn test_cancelled_paid_order_restocks() {
        let db = db().await;
        let h = harness(&db).await;
        seed_product(&db, "tee", "partner-a", Some(20)).await;
        let address = seed_address(&db, "user-1").await;

        h.engine.carts.add_item("user-1", "tee", None, 2).await.unwrap();
        let session = h
            .engine
            .checkout
            .checkout("user-1", &address.id, DeliveryOption::Standard)
            .await
            .unwrap();
        let order = h
            .engine
            .checkout
            .confirm_payment(&confirmation_for(&session, "pay_restock"))
            .await
            .unwrap();
        assert_eq!(db.catalog().get("tee").await.unwrap().unwrap().stock, Some(18));

        h.engine
            .orders
            .cancel(&order.id, &Actor::Client("user-1".into()), "Ordered twice")
            .await
            .unwrap();
        assert_eq!(db.catalog().get("tee").await.unwrap().unwrap().stock, Some(20));
        assert_eq!(db.catalog().available_stock("tee").await.unwrap(), Some(20));
    }
}
