//! # Order Lifecycle
//!
//! Frozen order snapshots and the rules of the order state machine.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PENDING_PAYMENT ──► CONFIRMED ──► PENDING_ACCEPTANCE ──► ACCEPTED      │
//! │        │                 │            ▲        │             │          │
//! │        ▼                 │            │        ▼             ▼          │
//! │  PAYMENT_FAILED          │   reassign └─ PARTNER_REJECTED  IN_PRODUCTION│
//! │                          │                     │             │          │
//! │                          │                     │             ▼          │
//! │        CANCELLED ◄───────┴─────────────────────┴──────── SHIPPED        │
//! │   (from any state before SHIPPED)                            │          │
//! │                                                              ▼          │
//! │                                                          DELIVERED      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Frozen Pricing
//! Order items carry the unit price, discount and effective price computed
//! at checkout. Nothing here recomputes them from the catalog.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, Rate};
use crate::types::{Actor, DeliveryOption, ShippingAddress};

// =============================================================================
// Order Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingPayment,
    Confirmed,
    PendingAcceptance,
    Accepted,
    PartnerRejected,
    InProduction,
    Shipped,
    Delivered,
    Cancelled,
    PaymentFailed,
}

impl OrderStatus {
    /// Allowed next states.
    pub fn allowed_next(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            PendingPayment => &[Confirmed, PaymentFailed, Cancelled],
            Confirmed => &[PendingAcceptance, Cancelled],
            PendingAcceptance => &[Accepted, PartnerRejected, Cancelled],
            PartnerRejected => &[PendingAcceptance, Cancelled],
            Accepted => &[InProduction, Cancelled],
            InProduction => &[Shipped, Cancelled],
            Shipped => &[Delivered],
            Delivered | Cancelled | PaymentFailed => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Payment was captured for orders in these states.
    pub fn is_paid(&self) -> bool {
        !matches!(
            self,
            OrderStatus::PendingPayment | OrderStatus::PaymentFailed
        )
    }

    /// Database/text form, e.g. `pending_payment`.
    pub fn as_str(&self) -> &'static str {
        use OrderStatus::*;
        match self {
            PendingPayment => "pending_payment",
            Confirmed => "confirmed",
            PendingAcceptance => "pending_acceptance",
            Accepted => "accepted",
            PartnerRejected => "partner_rejected",
            InProduction => "in_production",
            Shipped => "shipped",
            Delivered => "delivered",
            Cancelled => "cancelled",
            PaymentFailed => "payment_failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fails with `InvalidTransition` unless `from → to` is an edge.
pub fn ensure_transition(order_id: &str, from: OrderStatus, to: OrderStatus) -> CoreResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            order_id: order_id.to_string(),
            current: from,
            requested: to,
        })
    }
}

// =============================================================================
// Production Stage
// =============================================================================

/// Partner-reported progress while an order is IN_PRODUCTION.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductionStage {
    Started,
    Printing,
    QualityCheck,
    Packed,
}

impl fmt::Display for ProductionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductionStage::Started => "STARTED",
            ProductionStage::Printing => "PRINTING",
            ProductionStage::QualityCheck => "QUALITY_CHECK",
            ProductionStage::Packed => "PACKED",
        };
        f.write_str(s)
    }
}

/// Production only moves forward; repeating the current stage is refused.
pub fn ensure_stage_progress(
    current: Option<ProductionStage>,
    requested: ProductionStage,
) -> CoreResult<()> {
    match current {
        Some(current) if requested <= current => Err(CoreError::ProductionRegression {
            current: current.to_string(),
            requested: requested.to_string(),
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Partner Assignment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Internal record of which partner was asked to fulfil an order.
/// Never exposed to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPartnerAssignment {
    pub id: String,
    pub order_id: String,
    pub partner_id: String,
    pub status: AssignmentStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Order Aggregate
// =============================================================================

/// Frozen line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub customization_id: Option<String>,
    pub quantity: u32,
    pub original_unit_price: Money,
    pub discount_rate: Option<Rate>,
    pub effective_unit_price: Money,
    pub line_total: Money,
}

/// Frozen pricing breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPricing {
    pub original_subtotal: Money,
    pub subtotal: Money,
    pub discount_total: Money,
    pub gst_total: Money,
    pub cgst: Money,
    pub sgst: Money,
    pub igst: Money,
    pub delivery_charge: Money,
    pub total: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundMethod {
    OriginalPaymentMethod,
    /// Nothing was captured, nothing to refund.
    NotApplicable,
}

/// Refund computed and recorded at cancellation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDecision {
    pub refund_amount: Money,
    pub deduction_amount: Money,
    pub deduction_reason: Option<String>,
    pub refund_method: RefundMethod,
    pub refund_eta: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_by: String,
    pub cancelled_at: DateTime<Utc>,
    pub refund: RefundDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub courier: String,
    pub tracking_number: String,
    pub shipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Human-readable number, e.g. `MF-20261017-4F2A9C`.
    pub order_number: String,
    pub user_id: String,
    /// Current fulfilment partner. Withheld from clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    pub status: OrderStatus,
    pub production_stage: Option<ProductionStage>,
    pub delivery_option: DeliveryOption,
    pub shipping_address: ShippingAddress,
    pub pricing: OrderPricing,
    pub items: Vec<OrderItem>,
    pub cancellation: Option<Cancellation>,
    pub shipment: Option<Shipment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    /// The order as its client may see it, without the partner assignment.
    pub fn client_view(mut self) -> Self {
        self.partner_id = None;
        self
    }
}

/// Human-readable order number: `MF-YYYYMMDD-XXXXXX`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("MF-{}-{}", now.format("%Y%m%d"), suffix[..6].to_ascii_uppercase())
}

/// One immutable history row per transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusHistory {
    pub id: String,
    pub order_id: String,
    pub status: OrderStatus,
    /// Internal only; never shown to the client.
    pub note: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Created,
    Captured,
    Expired,
}

/// A gateway payment intent for one order. At most one is ever captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Unconfirmed payments past this instant are swept to PAYMENT_FAILED.
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
}

/// What the gateway sends back after the client pays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

impl PaymentConfirmation {
    /// Message the gateway signs: `gateway_order_id|gateway_payment_id`.
    pub fn signed_payload(&self) -> String {
        format!("{}|{}", self.gateway_order_id, self.gateway_payment_id)
    }
}

// =============================================================================
// Cancellation & Refund
// =============================================================================

/// Refund settings for cancellations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPolicy {
    /// Share of the order kept once production has started.
    pub production_deduction: Rate,
    /// Days until the refund reaches the client.
    pub refund_eta_days: i64,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        RefundPolicy {
            production_deduction: Rate::from_percent(30),
            refund_eta_days: 7,
        }
    }
}

/// Whether `actor` may cancel an order in `status`.
///
/// Clients cancel only before production and after payment. Operators may
/// also cancel unpaid, rejected and in-production orders. Nobody cancels
/// once the order has shipped.
pub fn can_cancel(status: OrderStatus, actor: &Actor) -> bool {
    use OrderStatus::*;
    match actor {
        Actor::Client(_) => matches!(status, Confirmed | PendingAcceptance | Accepted),
        Actor::Operator(_) | Actor::System => matches!(
            status,
            PendingPayment | Confirmed | PendingAcceptance | Accepted | PartnerRejected | InProduction
        ),
        Actor::Partner(_) => false,
    }
}

/// Computes the refund for cancelling an order in `status`.
///
/// ```text
/// before payment    → 0
/// before production → full total
/// in production     → total × (1 − deduction)
/// shipped or later  → NotCancellable
/// ```
pub fn compute_refund(
    order_id: &str,
    total: Money,
    status: OrderStatus,
    policy: &RefundPolicy,
    now: DateTime<Utc>,
) -> CoreResult<RefundDecision> {
    use OrderStatus::*;
    let eta = Some(now + Duration::days(policy.refund_eta_days));

    match status {
        PendingPayment => Ok(RefundDecision {
            refund_amount: Money::zero(),
            deduction_amount: Money::zero(),
            deduction_reason: None,
            refund_method: RefundMethod::NotApplicable,
            refund_eta: None,
        }),
        Confirmed | PendingAcceptance | Accepted | PartnerRejected => Ok(RefundDecision {
            refund_amount: total.rounded(),
            deduction_amount: Money::zero(),
            deduction_reason: None,
            refund_method: RefundMethod::OriginalPaymentMethod,
            refund_eta: eta,
        }),
        InProduction => {
            let refund = total.less_rate(policy.production_deduction).rounded().max(Money::zero());
            Ok(RefundDecision {
                refund_amount: refund,
                deduction_amount: total.rounded() - refund,
                deduction_reason: Some(format!(
                    "Production already started; {} retained for incurred work",
                    policy.production_deduction
                )),
                refund_method: RefundMethod::OriginalPaymentMethod,
                refund_eta: eta,
            })
        }
        Shipped | Delivered | Cancelled | PaymentFailed => Err(CoreError::NotCancellable {
            order_id: order_id.to_string(),
            current: status,
        }),
    }
}
