//! # Background Sweeper
//!
//! Timer-driven jobs that run beside the request path and only touch the
//! shared database.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Sweeper Loop                                  │
//! │                                                                         │
//! │  payment tick ──► expire_payments(now)    PENDING_PAYMENT past expiry   │
//! │                                            → PAYMENT_FAILED, release    │
//! │  cart tick ─────► delete_stale(now)       carts idle for N days         │
//! │  settlement tick► run_scheduled(period)   stale PROCESSING, new batches,│
//! │                                            FAILED retries               │
//! │  shutdown ──────► break                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every job acts through conditional updates in its own transaction, so
//! a payment confirmed just before a tick is never failed by it.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use merchflow_db::Database;

use crate::checkout::CheckoutOrchestrator;
use crate::config::SweeperSettings;
use crate::error::EngineResult;
use crate::settlement::SettlementBatcher;

/// Handle for stopping a running sweeper.
#[derive(Clone)]
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Asks the loop to stop after its current job.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(()).await.is_err() {
            debug!("Sweeper already stopped");
        }
    }
}

pub struct Sweeper {
    db: Database,
    checkout: CheckoutOrchestrator,
    settlements: SettlementBatcher,
    settings: SweeperSettings,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Sweeper {
    pub fn new(
        db: Database,
        checkout: CheckoutOrchestrator,
        settlements: SettlementBatcher,
        settings: SweeperSettings,
    ) -> (Self, SweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweeper = Sweeper {
            db,
            checkout,
            settlements,
            settings,
            shutdown_rx,
        };
        (sweeper, SweeperHandle { shutdown_tx })
    }

    /// Runs until shutdown. Spawn this as a background task.
    pub async fn run(mut self) {
        info!(
            payment_every = self.settings.payment_sweep_interval_secs,
            cart_every = self.settings.cart_sweep_interval_secs,
            settlement_every = self.settings.settlement_interval_secs,
            "Sweeper starting"
        );

        let mut payments = interval(self.settings.payment_sweep_interval_secs);
        let mut carts = interval(self.settings.cart_sweep_interval_secs);
        let mut settlements = interval(self.settings.settlement_interval_secs);

        loop {
            tokio::select! {
                _ = payments.tick() => {
                    if let Err(e) = self.sweep_payments().await {
                        error!(error = %e, "Payment sweep failed");
                    }
                }

                _ = carts.tick() => {
                    if let Err(e) = self.sweep_carts().await {
                        error!(error = %e, "Cart sweep failed");
                    }
                }

                _ = settlements.tick() => {
                    if let Err(e) = self.sweep_settlements().await {
                        error!(error = %e, "Settlement run failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sweeper shutting down");
                    break;
                }
            }
        }

        info!("Sweeper stopped");
    }

    pub async fn sweep_payments(&self) -> EngineResult<u32> {
        let failed = self
            .checkout
            .expire_payments(Utc::now(), self.settings.batch_size)
            .await?;
        if failed > 0 {
            info!(failed, "Expired unpaid orders");
        } else {
            debug!("No payments to expire");
        }
        Ok(failed)
    }

    pub async fn sweep_carts(&self) -> EngineResult<u64> {
        let deleted = self
            .db
            .carts()
            .delete_stale(Utc::now(), self.settings.stale_cart_days)
            .await?;
        if deleted > 0 {
            info!(deleted, "Deleted stale carts");
        } else {
            debug!("No stale carts");
        }
        Ok(deleted)
    }

    pub async fn sweep_settlements(&self) -> EngineResult<()> {
        let period = SettlementBatcher::scheduled_period(Utc::now(), self.settings.settlement_period_days)?;
        let summary = self
            .settlements
            .run_scheduled(
                period,
                self.settings.max_settlement_attempts,
                chrono::Duration::seconds(self.settings.settlement_lease_secs as i64),
            )
            .await?;
        if summary.generated + summary.retried + summary.reclaimed > 0 {
            info!(
                generated = summary.generated,
                reclaimed = summary.reclaimed,
                completed = summary.completed,
                failed = summary.failed,
                retried = summary.retried,
                "Settlement run finished"
            );
        } else {
            debug!("No settlements to run");
        }
        Ok(())
    }
}

fn interval(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
