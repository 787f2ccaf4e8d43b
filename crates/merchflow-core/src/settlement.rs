//! # Partner Settlements
//!
//! Periodic payout batches that turn delivered orders into partner earnings.
//!
//! ## Batch Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Settlement (partner, [period_start, period_end))                       │
//! │  ├── SettlementOrder  order_total, commission_rate, earning (rounded)    │
//! │  ├── SettlementOrder  ...                                               │
//! │  └── header           Σ order_total, Σ earning                          │
//! │                                                                         │
//! │  PENDING ──► PROCESSING ──► COMPLETED                                   │
//! │                   │                                                     │
//! │                   └───────► FAILED ──► PROCESSING (retry)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Earnings are rounded per order and the header is the sum of the rounded
//! lines, so line items always add up to the payout.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::commission::{partner_earning, ResolvedRate};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Rate};

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SettlementStatus {
    pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed) | (Failed, Processing)
        )
    }

    pub fn ensure_transition(&self, settlement_id: &str, next: SettlementStatus) -> CoreResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidSettlementTransition {
                settlement_id: settlement_id.to_string(),
                current: self.to_string(),
                requested: next.to_string(),
            })
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Processing => "PROCESSING",
            SettlementStatus::Completed => "COMPLETED",
            SettlementStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Period
// =============================================================================

/// Half-open `[start, end)` window of delivery timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SettlementPeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if end <= start {
            return Err(ValidationError::InvalidFormat {
                field: "period".to_string(),
                reason: "period end must be after its start".to_string(),
            });
        }
        Ok(SettlementPeriod { start, end })
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    /// The `days`-long period ending at the most recent UTC midnight
    /// before `now`. Scheduled runs settle this window.
    pub fn closed_before(now: DateTime<Utc>, days: i64) -> Result<Self, ValidationError> {
        let end = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);
        Self::new(end - Duration::days(days), end)
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOrder {
    pub order_id: String,
    pub order_total: Money,
    pub commission_rate: Rate,
    /// True when the fallback rate was used.
    pub fallback_rate: bool,
    pub partner_earning: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: String,
    pub partner_id: String,
    pub period: SettlementPeriod,
    pub status: SettlementStatus,
    pub total_order_value: Money,
    pub total_earning: Money,
    pub attempts: u32,
    pub payout_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub orders: Vec<SettlementOrder>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Settles one delivered order at its resolved rate.
pub fn settle_order(order_id: &str, order_total: Money, resolved: ResolvedRate) -> CoreResult<SettlementOrder> {
    if order_total.is_negative() {
        return Err(CoreError::InvalidAmount {
            amount: order_total,
            reason: "order total cannot be negative".to_string(),
        });
    }
    Ok(SettlementOrder {
        order_id: order_id.to_string(),
        order_total: order_total.rounded(),
        commission_rate: resolved.rate,
        fallback_rate: resolved.fallback,
        partner_earning: partner_earning(order_total, resolved.rate).rounded(),
    })
}

/// Header totals for a batch. Fails with `EmptyPeriod` when nothing is
/// eligible.
pub fn summarize(partner_id: &str, lines: &[SettlementOrder]) -> CoreResult<(Money, Money)> {
    if lines.is_empty() {
        return Err(CoreError::EmptyPeriod {
            partner_id: partner_id.to_string(),
        });
    }
    let value: Money = lines.iter().map(|l| l.order_total).sum();
    let earning: Money = lines.iter().map(|l| l.partner_earning).sum();
    Ok((value, earning))
}
