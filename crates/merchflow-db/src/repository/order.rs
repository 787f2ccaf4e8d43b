//! # Order Repository
//!
//! Orders, their frozen items, status history and partner assignments.
//!
//! ## Conditional Transitions
//! ```text
//! UPDATE orders SET status = :to WHERE id = :id AND status = :from
//!     rows_affected = 1  → this caller won the transition
//!     rows_affected = 0  → someone else moved the order first
//! ```
//! Every status change goes through `transition_tx`, so a sweep and a
//! payment confirmation racing on the same order cannot both succeed.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use merchflow_core::money::Money;
use merchflow_core::order::{
    AssignmentStatus, Cancellation, Order, OrderItem, OrderPartnerAssignment, OrderPricing,
    OrderStatus, OrderStatusHistory, ProductionStage, RefundDecision, RefundMethod, Shipment,
};
use merchflow_core::settlement::SettlementPeriod;
use merchflow_core::types::{DeliveryOption, ShippingAddress};

use super::{bps, new_id, to_rate, to_u32};
use crate::error::{DbError, DbResult};

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
struct OrderRecord {
    id: String,
    order_number: String,
    user_id: String,
    partner_id: Option<String>,
    status: OrderStatus,
    production_stage: Option<ProductionStage>,
    delivery_option: DeliveryOption,
    ship_recipient_name: String,
    ship_phone: String,
    ship_line1: String,
    ship_line2: Option<String>,
    ship_city: String,
    ship_state: String,
    ship_postal_code: String,
    original_subtotal_cents: i64,
    subtotal_cents: i64,
    discount_total_cents: i64,
    gst_total_cents: i64,
    cgst_cents: i64,
    sgst_cents: i64,
    igst_cents: i64,
    delivery_charge_cents: i64,
    total_cents: i64,
    cancel_reason: Option<String>,
    cancelled_by: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    refund_cents: Option<i64>,
    deduction_cents: Option<i64>,
    deduction_reason: Option<String>,
    refund_method: Option<RefundMethod>,
    refund_eta: Option<DateTime<Utc>>,
    courier: Option<String>,
    tracking_number: Option<String>,
    shipped_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    fn into_order(self, items: Vec<OrderItem>) -> Order {
        let cancellation = match (self.cancel_reason, self.cancelled_by, self.cancelled_at) {
            (Some(reason), Some(cancelled_by), Some(cancelled_at)) => Some(Cancellation {
                reason,
                cancelled_by,
                cancelled_at,
                refund: RefundDecision {
                    refund_amount: Money::from_cents(self.refund_cents.unwrap_or(0)),
                    deduction_amount: Money::from_cents(self.deduction_cents.unwrap_or(0)),
                    deduction_reason: self.deduction_reason,
                    refund_method: self.refund_method.unwrap_or(RefundMethod::NotApplicable),
                    refund_eta: self.refund_eta,
                },
            }),
            _ => None,
        };

        let shipment = match (self.courier, self.tracking_number, self.shipped_at) {
            (Some(courier), Some(tracking_number), Some(shipped_at)) => Some(Shipment {
                courier,
                tracking_number,
                shipped_at,
            }),
            _ => None,
        };

        Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            partner_id: self.partner_id,
            status: self.status,
            production_stage: self.production_stage,
            delivery_option: self.delivery_option,
            shipping_address: ShippingAddress {
                recipient_name: self.ship_recipient_name,
                phone: self.ship_phone,
                line1: self.ship_line1,
                line2: self.ship_line2,
                city: self.ship_city,
                state: self.ship_state,
                postal_code: self.ship_postal_code,
            },
            pricing: OrderPricing {
                original_subtotal: Money::from_cents(self.original_subtotal_cents),
                subtotal: Money::from_cents(self.subtotal_cents),
                discount_total: Money::from_cents(self.discount_total_cents),
                gst_total: Money::from_cents(self.gst_total_cents),
                cgst: Money::from_cents(self.cgst_cents),
                sgst: Money::from_cents(self.sgst_cents),
                igst: Money::from_cents(self.igst_cents),
                delivery_charge: Money::from_cents(self.delivery_charge_cents),
                total: Money::from_cents(self.total_cents),
            },
            items,
            cancellation,
            shipment,
            created_at: self.created_at,
            updated_at: self.updated_at,
            confirmed_at: self.confirmed_at,
            delivered_at: self.delivered_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct OrderItemRecord {
    id: String,
    product_id: String,
    product_name: String,
    customization_id: Option<String>,
    quantity: i64,
    original_unit_price_cents: i64,
    discount_bps: Option<i64>,
    effective_unit_price_cents: i64,
    line_total_cents: i64,
}

impl OrderItemRecord {
    fn into_item(self) -> DbResult<OrderItem> {
        Ok(OrderItem {
            quantity: to_u32("OrderItem", &self.id, self.quantity)?,
            discount_rate: self
                .discount_bps
                .map(|b| to_rate("OrderItem", &self.id, b))
                .transpose()?,
            id: self.id,
            product_id: self.product_id,
            product_name: self.product_name,
            customization_id: self.customization_id,
            original_unit_price: Money::from_cents(self.original_unit_price_cents),
            effective_unit_price: Money::from_cents(self.effective_unit_price_cents),
            line_total: Money::from_cents(self.line_total_cents),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct HistoryRecord {
    id: String,
    order_id: String,
    status: OrderStatus,
    note: Option<String>,
    actor: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AssignmentRecord {
    id: String,
    order_id: String,
    partner_id: String,
    status: AssignmentStatus,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
}

impl From<AssignmentRecord> for OrderPartnerAssignment {
    fn from(r: AssignmentRecord) -> Self {
        OrderPartnerAssignment {
            id: r.id,
            order_id: r.order_id,
            partner_id: r.partner_id,
            status: r.status,
            reason: r.reason,
            created_at: r.created_at,
            responded_at: r.responded_at,
        }
    }
}

/// A delivered order that has not been settled yet.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UnsettledOrder {
    pub order_id: String,
    pub total_cents: i64,
}

const SELECT_ORDER: &str = r#"
    SELECT id, order_number, user_id, partner_id, status, production_stage, delivery_option,
           ship_recipient_name, ship_phone, ship_line1, ship_line2, ship_city, ship_state, ship_postal_code,
           original_subtotal_cents, subtotal_cents, discount_total_cents, gst_total_cents,
           cgst_cents, sgst_cents, igst_cents, delivery_charge_cents, total_cents,
           cancel_reason, cancelled_by, cancelled_at, refund_cents, deduction_cents,
           deduction_reason, refund_method, refund_eta,
           courier, tracking_number, shipped_at,
           created_at, updated_at, confirmed_at, delivered_at
    FROM orders
"#;

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Writes the order header and its frozen items.
    pub async fn insert_tx(&self, conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
        debug!(order_id = %order.id, order_number = %order.order_number, "Inserting order");

        let ship = &order.shipping_address;
        let p = &order.pricing;
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, user_id, partner_id, status, production_stage, delivery_option,
                ship_recipient_name, ship_phone, ship_line1, ship_line2, ship_city, ship_state, ship_postal_code,
                original_subtotal_cents, subtotal_cents, discount_total_cents, gst_total_cents,
                cgst_cents, sgst_cents, igst_cents, delivery_charge_cents, total_cents,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22, ?23,
                ?24, ?25
            )
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.user_id)
        .bind(&order.partner_id)
        .bind(order.status)
        .bind(order.production_stage)
        .bind(order.delivery_option)
        .bind(&ship.recipient_name)
        .bind(&ship.phone)
        .bind(&ship.line1)
        .bind(&ship.line2)
        .bind(&ship.city)
        .bind(&ship.state)
        .bind(&ship.postal_code)
        .bind(p.original_subtotal.to_cents())
        .bind(p.subtotal.to_cents())
        .bind(p.discount_total.to_cents())
        .bind(p.gst_total.to_cents())
        .bind(p.cgst.to_cents())
        .bind(p.sgst.to_cents())
        .bind(p.igst.to_cents())
        .bind(p.delivery_charge.to_cents())
        .bind(p.total.to_cents())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, product_name, customization_id, quantity,
                    original_unit_price_cents, discount_bps, effective_unit_price_cents, line_total_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&item.id)
            .bind(&order.id)
            .bind(&item.product_id)
            .bind(&item.product_name)
            .bind(&item.customization_id)
            .bind(i64::from(item.quantity))
            .bind(item.original_unit_price.to_cents())
            .bind(item.discount_rate.map(bps))
            .bind(item.effective_unit_price.to_cents())
            .bind(item.line_total.to_cents())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        self.get_tx(&mut conn, id).await
    }

    pub async fn get_tx(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Order>> {
        let record: Option<OrderRecord> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_ORDER))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match record {
            Some(record) => {
                let items = load_items(conn, &record.id).await?;
                Ok(Some(record.into_order(items)))
            }
            None => Ok(None),
        }
    }

    /// Fails with `NotFound` when missing or owned by another user.
    pub async fn get_owned(&self, id: &str, user_id: &str) -> DbResult<Order> {
        match self.get(id).await? {
            Some(order) if order.user_id == user_id => Ok(order),
            _ => Err(DbError::not_found("Order", id)),
        }
    }

    /// Fails with `NotFound` unless `partner_id` is the assigned partner.
    pub async fn get_for_partner(&self, id: &str, partner_id: &str) -> DbResult<Order> {
        match self.get(id).await? {
            Some(order) if order.partner_id.as_deref() == Some(partner_id) => Ok(order),
            _ => Err(DbError::not_found("Order", id)),
        }
    }

    pub async fn list_for_user(&self, user_id: &str, limit: u32) -> DbResult<Vec<Order>> {
        self.list_where("WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2", user_id, limit)
            .await
    }

    pub async fn list_for_partner(&self, partner_id: &str, limit: u32) -> DbResult<Vec<Order>> {
        self.list_where("WHERE partner_id = ?1 ORDER BY created_at DESC LIMIT ?2", partner_id, limit)
            .await
    }

    pub async fn list_by_status(&self, status: OrderStatus, limit: u32) -> DbResult<Vec<Order>> {
        self.list_where("WHERE status = ?1 ORDER BY created_at LIMIT ?2", status.as_str(), limit)
            .await
    }

    async fn list_where(&self, clause: &str, key: &str, limit: u32) -> DbResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let records: Vec<OrderRecord> = sqlx::query_as(&format!("{} {}", SELECT_ORDER, clause))
            .bind(key)
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await?;

        let mut orders = Vec::with_capacity(records.len());
        for record in records {
            let items = load_items(&mut conn, &record.id).await?;
            orders.push(record.into_order(items));
        }
        Ok(orders)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Moves the order from `from` to `to` if it is still in `from`.
    ///
    /// Stamps `confirmed_at` / `delivered_at` on the matching transitions.
    /// Returns false when the order was not in `from`.
    pub async fn transition_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?1,
                updated_at = ?2,
                confirmed_at = CASE WHEN ?1 = 'confirmed' THEN ?2 ELSE confirmed_at END,
                delivered_at = CASE WHEN ?1 = 'delivered' THEN ?2 ELSE delivered_at END
            WHERE id = ?3 AND status = ?4
            "#,
        )
        .bind(to)
        .bind(now)
        .bind(id)
        .bind(from)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn append_history_tx(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
        status: OrderStatus,
        note: Option<&str>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_status_history (id, order_id, status, note, actor, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(new_id())
        .bind(order_id)
        .bind(status)
        .bind(note)
        .bind(actor)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Full history, oldest first. Notes are internal.
    pub async fn history(&self, order_id: &str) -> DbResult<Vec<OrderStatusHistory>> {
        let records: Vec<HistoryRecord> = sqlx::query_as(
            r#"
            SELECT id, order_id, status, note, actor, created_at
            FROM order_status_history
            WHERE order_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .map(|r| OrderStatusHistory {
                id: r.id,
                order_id: r.order_id,
                status: r.status,
                note: r.note,
                actor: r.actor,
                created_at: r.created_at,
            })
            .collect())
    }

    // =========================================================================
    // Fulfilment Details
    // =========================================================================

    pub async fn set_partner_tx(&self, conn: &mut SqliteConnection, id: &str, partner_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE orders SET partner_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(partner_id)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Advances the production stage if it is still `expected`.
    pub async fn set_stage_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        expected: Option<ProductionStage>,
        stage: ProductionStage,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET production_stage = ?1, updated_at = ?2
            WHERE id = ?3 AND production_stage IS ?4
            "#,
        )
        .bind(stage)
        .bind(Utc::now())
        .bind(id)
        .bind(expected)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_shipment_tx(&self, conn: &mut SqliteConnection, id: &str, shipment: &Shipment) -> DbResult<()> {
        sqlx::query(
            "UPDATE orders SET courier = ?1, tracking_number = ?2, shipped_at = ?3, updated_at = ?3 WHERE id = ?4",
        )
        .bind(&shipment.courier)
        .bind(&shipment.tracking_number)
        .bind(shipment.shipped_at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Records the cancellation and its refund. Written once.
    pub async fn set_cancellation_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        cancellation: &Cancellation,
    ) -> DbResult<()> {
        let refund = &cancellation.refund;
        sqlx::query(
            r#"
            UPDATE orders
            SET cancel_reason = ?1, cancelled_by = ?2, cancelled_at = ?3,
                refund_cents = ?4, deduction_cents = ?5, deduction_reason = ?6,
                refund_method = ?7, refund_eta = ?8, updated_at = ?3
            WHERE id = ?9 AND cancelled_at IS NULL
            "#,
        )
        .bind(&cancellation.reason)
        .bind(&cancellation.cancelled_by)
        .bind(cancellation.cancelled_at)
        .bind(refund.refund_amount.to_cents())
        .bind(refund.deduction_amount.to_cents())
        .bind(&refund.deduction_reason)
        .bind(refund.refund_method)
        .bind(refund.refund_eta)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Partner Assignments
    // =========================================================================

    pub async fn insert_assignment_tx(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
        partner_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<OrderPartnerAssignment> {
        let assignment = OrderPartnerAssignment {
            id: new_id(),
            order_id: order_id.to_string(),
            partner_id: partner_id.to_string(),
            status: AssignmentStatus::Pending,
            reason: None,
            created_at: now,
            responded_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO order_partner_assignments (id, order_id, partner_id, status, reason, created_at)
            VALUES (?1, ?2, ?3, ?4, NULL, ?5)
            "#,
        )
        .bind(&assignment.id)
        .bind(order_id)
        .bind(partner_id)
        .bind(assignment.status)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(assignment)
    }

    /// Closes the open assignment of `partner_id`. False when none is open.
    pub async fn respond_assignment_tx(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
        partner_id: &str,
        status: AssignmentStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE order_partner_assignments
            SET status = ?1, reason = ?2, responded_at = ?3
            WHERE order_id = ?4 AND partner_id = ?5 AND status = 'pending'
            "#,
        )
        .bind(status)
        .bind(reason)
        .bind(now)
        .bind(order_id)
        .bind(partner_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn assignments(&self, order_id: &str) -> DbResult<Vec<OrderPartnerAssignment>> {
        let mut conn = self.pool.acquire().await?;
        self.assignments_tx(&mut conn, order_id).await
    }

    pub async fn assignments_tx(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> DbResult<Vec<OrderPartnerAssignment>> {
        let records: Vec<AssignmentRecord> = sqlx::query_as(
            r#"
            SELECT id, order_id, partner_id, status, reason, created_at, responded_at
            FROM order_partner_assignments
            WHERE order_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(records.into_iter().map(OrderPartnerAssignment::from).collect())
    }

    // =========================================================================
    // Settlement Queries
    // =========================================================================

    /// DELIVERED orders of `partner_id` delivered within `period` that no
    /// settlement includes yet.
    pub async fn unsettled_delivered_tx(
        &self,
        conn: &mut SqliteConnection,
        partner_id: &str,
        period: &SettlementPeriod,
    ) -> DbResult<Vec<UnsettledOrder>> {
        let rows = sqlx::query_as(
            r#"
            SELECT o.id AS order_id, o.total_cents
            FROM orders o
            WHERE o.partner_id = ?1
              AND o.status = 'delivered'
              AND o.delivered_at >= ?2
              AND o.delivered_at < ?3
              AND NOT EXISTS (SELECT 1 FROM settlement_orders s WHERE s.order_id = o.id)
            ORDER BY o.delivered_at, o.id
            "#,
        )
        .bind(partner_id)
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Partners with at least one unsettled delivery in `period`.
    pub async fn partners_with_unsettled(&self, period: &SettlementPeriod) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT DISTINCT o.partner_id
            FROM orders o
            WHERE o.partner_id IS NOT NULL
              AND o.status = 'delivered'
              AND o.delivered_at >= ?1
              AND o.delivered_at < ?2
              AND NOT EXISTS (SELECT 1 FROM settlement_orders s WHERE s.order_id = o.id)
            ORDER BY o.partner_id
            "#,
        )
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

async fn load_items(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
    let records: Vec<OrderItemRecord> = sqlx::query_as(
        r#"
        SELECT id, product_id, product_name, customization_id, quantity,
               original_unit_price_cents, discount_bps, effective_unit_price_cents, line_total_cents
        FROM order_items
        WHERE order_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    records.into_iter().map(OrderItemRecord::into_item).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::test_support::{address, db};
    use merchflow_core::money::Rate;
    use merchflow_core::order::generate_order_number;

    pub(crate) fn order(user_id: &str, partner_id: &str, total: i64) -> Order {
        let now = Utc::now();
        let total = Money::from_major(total);
        Order {
            id: new_id(),
            order_number: generate_order_number(now),
            user_id: user_id.into(),
            partner_id: Some(partner_id.into()),
            status: OrderStatus::PendingPayment,
            production_stage: None,
            delivery_option: DeliveryOption::Standard,
            shipping_address: address(),
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
                quantity: 12,
                original_unit_price: Money::from_major(100),
                discount_rate: Some(Rate::from_percent(10)),
                effective_unit_price: Money::from_major(90),
                line_total: Money::from_major(1080),
            }],
            cancellation: None,
            shipment: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            delivered_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_frozen_items() {
        let db = db().await;
        let o = order("user-1", "partner-1", 1080);
        let mut tx = db.begin_write().await.unwrap();
        db.orders().insert_tx(&mut tx, &o).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = db.orders().get_owned(&o.id, "user-1").await.unwrap();
        assert_eq!(loaded.items, o.items);
        assert_eq!(loaded.pricing, o.pricing);
        assert!(db.orders().get_owned(&o.id, "user-2").await.is_err());
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let db = db().await;
        let o = order("user-1", "partner-1", 500);
        let repo = db.orders();
        let mut tx = db.begin_write().await.unwrap();
        repo.insert_tx(&mut tx, &o).await.unwrap();

        let now = Utc::now();
        assert!(repo
            .transition_tx(&mut tx, &o.id, OrderStatus::PendingPayment, OrderStatus::Confirmed, now)
            .await
            .unwrap());
        assert!(!repo
            .transition_tx(&mut tx, &o.id, OrderStatus::PendingPayment, OrderStatus::PaymentFailed, now)
            .await
            .unwrap());
        repo.append_history_tx(&mut tx, &o.id, OrderStatus::Confirmed, Some("captured"), "system", now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let loaded = repo.get(&o.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Confirmed);
        assert!(loaded.confirmed_at.is_some());
        assert_eq!(repo.history(&o.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_pending_assignment() {
        let db = db().await;
        let o = order("user-1", "partner-1", 500);
        let repo = db.orders();
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        repo.insert_tx(&mut tx, &o).await.unwrap();
        repo.insert_assignment_tx(&mut tx, &o.id, "partner-1", now).await.unwrap();
        assert!(repo.insert_assignment_tx(&mut tx, &o.id, "partner-2", now).await.is_err());

        assert!(repo
            .respond_assignment_tx(&mut tx, &o.id, "partner-1", AssignmentStatus::Rejected, Some("no capacity"), now)
            .await
            .unwrap());
        repo.insert_assignment_tx(&mut tx, &o.id, "partner-2", now).await.unwrap();
        tx.commit().await.unwrap();

        let assignments = repo.assignments(&o.id).await.unwrap();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].status, AssignmentStatus::Rejected);
    }
}
