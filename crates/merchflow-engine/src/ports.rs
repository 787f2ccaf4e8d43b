//! # External Ports
//!
//! Collaborators the ordering core talks to but does not own.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Port Boundaries                                 │
//! │                                                                         │
//! │   Catalog ─────────── get_product, available_stock                     │
//! │   PartnerRegistry ─── partners_for_category                            │
//! │   PaymentGateway ──── create_payment_intent, verify_signature          │
//! │   Notifier ────────── notify (fire-and-forget)                         │
//! │   PayoutGateway ───── pay_out                                          │
//! │                                                                         │
//! │   Local implementations: DbCatalog, DbPartnerRegistry,                 │
//! │   HmacPaymentGateway, TracingNotifier, LoggingPayoutGateway            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use merchflow_core::money::Money;
use merchflow_core::order::PaymentConfirmation;
use merchflow_core::settlement::Settlement;
use merchflow_core::types::Product;
use merchflow_core::CoreError;
use merchflow_db::Database;

use crate::config::EngineConfig;
use crate::error::EngineResult;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Catalog & Partners
// =============================================================================

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: &str) -> EngineResult<Option<Product>>;

    /// Stock minus active reservations; `None` when not tracked.
    async fn available_stock(&self, product_id: &str) -> EngineResult<Option<i64>>;
}

#[async_trait]
pub trait PartnerRegistry: Send + Sync {
    /// Active partners producing `category`, best first.
    async fn partners_for_category(&self, category: &str) -> EngineResult<Vec<String>>;
}

/// Catalog backed by the local `products` tables.
pub struct DbCatalog {
    db: Database,
}

impl DbCatalog {
    pub fn new(db: Database) -> Self {
        DbCatalog { db }
    }
}

#[async_trait]
impl Catalog for DbCatalog {
    async fn get_product(&self, id: &str) -> EngineResult<Option<Product>> {
        Ok(self.db.catalog().get(id).await?)
    }

    async fn available_stock(&self, product_id: &str) -> EngineResult<Option<i64>> {
        Ok(self.db.catalog().available_stock(product_id).await?)
    }
}

pub struct DbPartnerRegistry {
    db: Database,
}

impl DbPartnerRegistry {
    pub fn new(db: Database) -> Self {
        DbPartnerRegistry { db }
    }
}

#[async_trait]
impl PartnerRegistry for DbPartnerRegistry {
    async fn partners_for_category(&self, category: &str) -> EngineResult<Vec<String>> {
        Ok(self.db.partners().list_for_category(category).await?)
    }
}

// =============================================================================
// Payment Gateway
// =============================================================================

/// Handle returned to the client to start paying at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntent {
    pub gateway_order_id: String,
    pub amount: Money,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(&self, order_number: &str, amount: Money) -> EngineResult<PaymentIntent>;

    /// True when the confirmation was signed with the shared secret.
    fn verify_signature(&self, confirmation: &PaymentConfirmation) -> bool;
}

/// Gateway that issues local order ids and checks HMAC-SHA256 signatures
/// over `gateway_order_id|gateway_payment_id`.
pub struct HmacPaymentGateway {
    key_secret: String,
}

impl HmacPaymentGateway {
    pub fn new(key_secret: impl Into<String>) -> Self {
        HmacPaymentGateway {
            key_secret: key_secret.into(),
        }
    }

    /// Hex signature the gateway would attach to this payment.
    pub fn sign(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        let confirmation = PaymentConfirmation {
            gateway_order_id: gateway_order_id.to_string(),
            gateway_payment_id: gateway_payment_id.to_string(),
            signature: String::new(),
        };
        // HMAC accepts keys of any length
        match HmacSha256::new_from_slice(self.key_secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(confirmation.signed_payload().as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            Err(_) => String::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HmacPaymentGateway {
    async fn create_payment_intent(&self, order_number: &str, amount: Money) -> EngineResult<PaymentIntent> {
        if amount.is_negative() || amount.is_zero() {
            return Err(CoreError::InvalidAmount {
                amount,
                reason: "payment amount must be positive".to_string(),
            }
            .into());
        }

        let gateway_order_id = format!("gw_{}", Uuid::new_v4().simple());
        info!(order_number = %order_number, gateway_order_id = %gateway_order_id, amount = %amount, "Payment intent created");
        Ok(PaymentIntent {
            gateway_order_id,
            amount,
        })
    }

    fn verify_signature(&self, confirmation: &PaymentConfirmation) -> bool {
        let Ok(signature) = hex::decode(confirmation.signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.key_secret.as_bytes()) else {
            return false;
        };
        mac.update(confirmation.signed_payload().as_bytes());
        // constant-time comparison
        mac.verify_slice(&signature).is_ok()
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Events surfaced to clients, partners and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    OrderConfirmed { order_id: String, user_id: String },
    /// Operator alert; reassignment is manual unless requested.
    PartnerRejected {
        order_id: String,
        partner_id: String,
        reason: String,
    },
    OrderCancelled { order_id: String, refund: Money },
    PaymentExpired { order_id: String },
    /// Paid at the gateway after the window closed; needs a manual refund.
    LatePayment {
        order_id: String,
        gateway_payment_id: String,
    },
    SettlementFailed {
        settlement_id: String,
        partner_id: String,
        reason: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivery failures are the notifier's problem, never the caller's.
    async fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) {
        match &notification {
            Notification::PartnerRejected {
                order_id,
                partner_id,
                reason,
            } => warn!(order_id = %order_id, partner_id = %partner_id, reason = %reason, "Partner rejected order; reassignment needed"),
            Notification::LatePayment {
                order_id,
                gateway_payment_id,
            } => error!(order_id = %order_id, gateway_payment_id = %gateway_payment_id, "Payment captured after expiry; refund manually"),
            Notification::SettlementFailed {
                settlement_id,
                partner_id,
                reason,
            } => warn!(settlement_id = %settlement_id, partner_id = %partner_id, reason = %reason, "Settlement payout failed"),
            other => info!(notification = ?other, "Notification"),
        }
    }
}

// =============================================================================
// Payouts
// =============================================================================

#[async_trait]
pub trait PayoutGateway: Send + Sync {
    /// Pays the partner's earning; returns the payout reference.
    async fn pay_out(&self, settlement: &Settlement) -> EngineResult<String>;
}

/// Records payouts in the log and hands back a local reference.
pub struct LoggingPayoutGateway;

#[async_trait]
impl PayoutGateway for LoggingPayoutGateway {
    async fn pay_out(&self, settlement: &Settlement) -> EngineResult<String> {
        let reference = format!("po_{}", Uuid::new_v4().simple());
        info!(
            settlement_id = %settlement.id,
            partner_id = %settlement.partner_id,
            amount = %settlement.total_earning,
            reference = %reference,
            "Payout issued"
        );
        Ok(reference)
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// Every external collaborator in one cloneable handle.
#[derive(Clone)]
pub struct Ports {
    pub catalog: Arc<dyn Catalog>,
    pub partners: Arc<dyn PartnerRegistry>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub payouts: Arc<dyn PayoutGateway>,
}

impl Ports {
    /// Database-backed catalog and registry with local gateways.
    pub fn local(db: &Database, config: &EngineConfig) -> Self {
        Ports {
            catalog: Arc::new(DbCatalog::new(db.clone())),
            partners: Arc::new(DbPartnerRegistry::new(db.clone())),
            payments: Arc::new(HmacPaymentGateway::new(config.checkout.gateway_key_secret.clone())),
            notifier: Arc::new(TracingNotifier),
            payouts: Arc::new(LoggingPayoutGateway),
        }
    }
}
