//! # Settlement Batcher
//!
//! Groups a partner's delivered, unsettled orders into a settlement and
//! pays it out.
//!
//! ## Run Shape
//! ```text
//! generate_settlement(partner, period)          one write transaction
//!      │
//!      ├── default commission config (or fallback rate)
//!      ├── DELIVERED orders in period, not in any settlement
//!      │        └── none ──► EMPTY_PERIOD
//!      ├── per order: resolve rate on frozen total, earning = total × (1 − rate)
//!      └── insert header (PENDING) + lines
//!
//! process_settlement(id)
//!      PENDING/FAILED ──► PROCESSING ──► PayoutGateway.pay_out
//!                                           ├── ok ───► COMPLETED (reference)
//!                                           └── err ──► FAILED (reason, attempts)
//!
//! run_scheduled(period, max_attempts, lease)
//!      PROCESSING older than lease ──► FAILED (payout interrupted)
//!      new batches, then FAILED retries below max_attempts
//! ```
//!
//! `settlement_orders.order_id` is unique, so two batches racing for the
//! same order cannot both commit.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use merchflow_core::money::Money;
use merchflow_core::settlement::{settle_order, summarize, Settlement, SettlementPeriod, SettlementStatus};
use merchflow_core::CoreError;
use merchflow_db::repository::new_id;
use merchflow_db::Database;

use crate::commission::CommissionResolver;
use crate::error::{EngineError, EngineResult};
use crate::ports::{Notification, Ports};

/// Counters from one scheduled pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementRunSummary {
    pub generated: u32,
    pub completed: u32,
    pub failed: u32,
    pub retried: u32,
    pub reclaimed: u32,
}

#[derive(Clone)]
pub struct SettlementBatcher {
    db: Database,
    ports: Ports,
    commission: CommissionResolver,
    payout_timeout: Duration,
}

impl SettlementBatcher {
    pub fn new(db: Database, ports: Ports, commission: CommissionResolver, payout_timeout: Duration) -> Self {
        SettlementBatcher {
            db,
            ports,
            commission,
            payout_timeout,
        }
    }

    // =========================================================================
    // Generation
    // =========================================================================

    /// Creates a PENDING settlement for `partner_id` over `period`.
    ///
    /// Fails with `EMPTY_PERIOD` when nothing is eligible.
    pub async fn generate_settlement(&self, partner_id: &str, period: SettlementPeriod) -> EngineResult<Settlement> {
        let now = Utc::now();
        let mut tx = self.db.begin_write().await?;

        let config = self.db.commission().default_active_tx(&mut tx).await?;
        let eligible = self
            .db
            .orders()
            .unsettled_delivered_tx(&mut tx, partner_id, &period)
            .await?;

        let mut lines = Vec::with_capacity(eligible.len());
        for order in &eligible {
            let total = Money::from_cents(order.total_cents);
            let resolved = self.commission.resolve_rate(total, config.as_ref());
            lines.push(settle_order(&order.order_id, total, resolved)?);
        }
        let (total_order_value, total_earning) = summarize(partner_id, &lines)?;

        let settlement = Settlement {
            id: new_id(),
            partner_id: partner_id.to_string(),
            period,
            status: SettlementStatus::Pending,
            total_order_value,
            total_earning,
            attempts: 0,
            payout_reference: None,
            failure_reason: None,
            orders: lines,
            created_at: now,
            updated_at: now,
        };
        self.db
            .settlements()
            .insert_tx(&mut tx, &settlement, config.as_ref().map(|c| c.id.as_str()))
            .await?;
        tx.commit().await?;

        info!(
            settlement_id = %settlement.id,
            partner_id = %partner_id,
            orders = settlement.orders.len(),
            order_value = %settlement.total_order_value,
            earning = %settlement.total_earning,
            "Settlement generated"
        );
        Ok(settlement)
    }

    // =========================================================================
    // Payout
    // =========================================================================

    /// Pays out a PENDING or FAILED settlement.
    ///
    /// A payout error is recorded on the settlement, which is returned as
    /// FAILED rather than as an error.
    pub async fn process_settlement(&self, settlement_id: &str) -> EngineResult<Settlement> {
        let repo = self.db.settlements();
        let settlement = self.get(settlement_id).await?;
        settlement
            .status
            .ensure_transition(settlement_id, SettlementStatus::Processing)?;

        let mut tx = self.db.begin_write().await?;
        if !repo
            .begin_processing_tx(&mut tx, settlement_id, settlement.status, Utc::now())
            .await?
        {
            return Err(EngineError::ConcurrentUpdate {
                entity: "Settlement",
                id: settlement_id.to_string(),
            });
        }
        tx.commit().await?;

        let outcome = match tokio::time::timeout(self.payout_timeout, self.ports.payouts.pay_out(&settlement)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::GatewayTimeout {
                operation: "pay_out",
                secs: self.payout_timeout.as_secs(),
            }),
        };

        let mut tx = self.db.begin_write().await?;
        match &outcome {
            Ok(reference) => {
                repo.complete_tx(&mut tx, settlement_id, reference, Utc::now()).await?;
            }
            Err(e) => {
                repo.fail_tx(&mut tx, settlement_id, &e.to_string(), Utc::now()).await?;
            }
        }
        let updated = repo
            .get_tx(&mut tx, settlement_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Settlement", settlement_id))?;
        tx.commit().await?;

        match outcome {
            Ok(reference) => {
                info!(settlement_id = %settlement_id, reference = %reference, "Settlement completed");
            }
            Err(e) => {
                warn!(settlement_id = %settlement_id, attempts = updated.attempts, error = %e, "Settlement payout failed");
                self.ports
                    .notifier
                    .notify(Notification::SettlementFailed {
                        settlement_id: settlement_id.to_string(),
                        partner_id: updated.partner_id.clone(),
                        reason: e.to_string(),
                    })
                    .await;
            }
        }
        Ok(updated)
    }

    // =========================================================================
    // Scheduled Runs
    // =========================================================================

    /// Settles every partner with deliveries in `period`, then retries
    /// FAILED settlements that still have attempts left.
    ///
    /// PROCESSING settlements untouched for longer than `lease` are failed
    /// first so they join the retry pass.
    pub async fn run_scheduled(
        &self,
        period: SettlementPeriod,
        max_attempts: u32,
        lease: chrono::Duration,
    ) -> EngineResult<SettlementRunSummary> {
        let mut summary = SettlementRunSummary {
            reclaimed: self.fail_interrupted(lease).await?,
            ..Default::default()
        };

        for partner_id in self.db.orders().partners_with_unsettled(&period).await? {
            let settlement = match self.generate_settlement(&partner_id, period).await {
                Ok(s) => s,
                Err(EngineError::Core(CoreError::EmptyPeriod { .. })) => {
                    debug!(partner_id = %partner_id, "Nothing left to settle");
                    continue;
                }
                Err(e) => {
                    error!(partner_id = %partner_id, error = %e, "Settlement generation failed");
                    continue;
                }
            };
            summary.generated += 1;
            self.tally(&settlement.id, &mut summary).await;
        }

        for failed in self.db.settlements().list_by_status(SettlementStatus::Failed).await? {
            if failed.attempts >= max_attempts {
                debug!(settlement_id = %failed.id, attempts = failed.attempts, "Settlement out of retries");
                continue;
            }
            summary.retried += 1;
            self.tally(&failed.id, &mut summary).await;
        }

        Ok(summary)
    }

    async fn fail_interrupted(&self, lease: chrono::Duration) -> EngineResult<u32> {
        let now = Utc::now();
        let mut tx = self.db.begin_write().await?;
        let reclaimed = self
            .db
            .settlements()
            .fail_stale_processing_tx(&mut tx, now - lease, "payout interrupted", now)
            .await?;
        tx.commit().await?;
        if reclaimed > 0 {
            warn!(count = reclaimed, "Interrupted settlements moved back to FAILED");
        }
        Ok(u32::try_from(reclaimed).unwrap_or(u32::MAX))
    }

    async fn tally(&self, settlement_id: &str, summary: &mut SettlementRunSummary) {
        match self.process_settlement(settlement_id).await {
            Ok(s) if s.status == SettlementStatus::Completed => summary.completed += 1,
            Ok(_) => summary.failed += 1,
            Err(e) => {
                error!(settlement_id = %settlement_id, error = %e, "Settlement processing failed");
                summary.failed += 1;
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, settlement_id: &str) -> EngineResult<Settlement> {
        self.db
            .settlements()
            .get(settlement_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Settlement", settlement_id))
    }

    pub async fn list_for_partner(&self, partner_id: &str) -> EngineResult<Vec<Settlement>> {
        Ok(self.db.settlements().list_for_partner(partner_id).await?)
    }

    /// Period ending at the last UTC midnight before `now`.
    pub fn scheduled_period(now: DateTime<Utc>, days: i64) -> EngineResult<SettlementPeriod> {
        Ok(SettlementPeriod::closed_before(now, days)?)
    }
}
