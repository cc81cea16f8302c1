//! Per-loan liquidation worker.
//!
//! One worker drives a loan from `liquidating` to `liquidated`: size the
//! next lot, pick the better venue, execute with unbounded jittered
//! retries, persist progress per fill, and finalize with the single
//! `liquidation` event. There is no terminal failure state; the worker
//! only stops early when it loses its lease, and the loan is then picked
//! up again by the recovery paths.

use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::sizing::{next_lot, required_quantity};
use super::LiquidationRunner;
use crate::backoff::Backoff;
use crate::events::LoanEvent;
use crate::money::floor_to_u64;
use crate::publisher::publish_with_audit;
use coruscant_api::VenueFill;
use coruscant_store::{AuditEntry, AuditKind, LoanStatus, StoreError};

/// Lease lifetime; must outlast one full trade attempt cycle (venue
/// timeout plus capped backoff).
fn lease_ttl() -> ChronoDuration {
    ChronoDuration::seconds(90)
}

const TRADE_BACKOFF_BASE: Duration = Duration::from_millis(500);
const STALE_BACKOFF_BASE: Duration = Duration::from_secs(1);
const STALE_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Why a run stopped without finalizing. The loan stays `liquidating`
/// and is recovered later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Suspension {
    LeaseLost,
    LoanVanished,
}

impl LiquidationRunner {
    /// Entry point for one queued job: take the lease, run, release.
    #[instrument(skip(self), fields(worker = worker_id))]
    pub async fn run_loan(&self, worker_id: &str, loan_id: &str) {
        if !self
            .store
            .acquire_lease(loan_id, worker_id, lease_ttl(), self.clock.now())
        {
            debug!(loan_id, "lease held elsewhere, dropping job");
            return;
        }

        let outcome = self.liquidate(worker_id, loan_id).await;
        self.store.release_lease(loan_id, worker_id);

        if let Err(suspension) = outcome {
            warn!(loan_id, ?suspension, "liquidation run suspended");
        }
    }

    async fn liquidate(&self, worker_id: &str, loan_id: &str) -> Result<(), Suspension> {
        let loan = self.store.get(loan_id).ok_or(Suspension::LoanVanished)?;
        if loan.status != LoanStatus::Liquidating {
            debug!(loan_id, status = %loan.status, "loan not liquidating, nothing to do");
            return Ok(());
        }

        self.store.append_audit(AuditEntry::new(
            loan_id,
            self.clock.now(),
            AuditKind::LiquidationStarted {
                worker: worker_id.to_string(),
            },
        ));
        info!(
            loan_id,
            principal = %loan.principal,
            collateral = %loan.collateral,
            already_sold = %loan.collateral_sold,
            "liquidation started"
        );

        let principal = loan.principal;

        loop {
            // Re-read each round: progress is durable on the loan, so a
            // resumed run picks up where the last one stopped.
            let loan = self.store.get(loan_id).ok_or(Suspension::LoanVanished)?;
            if loan.proceeds_gc >= principal {
                break;
            }
            let sellable = floor_to_u64(loan.remaining_collateral());
            if sellable == 0 {
                break;
            }

            let mid = self.await_mid_price(worker_id, loan_id).await?;
            let needed = required_quantity(loan.outstanding_balance(), mid).max(1);
            let target = needed.min(sellable);
            let Some(lot) = next_lot(target) else {
                break;
            };

            let (fill, attempts) = self.trade_lot(worker_id, loan_id, lot).await?;
            if self
                .store
                .record_liquidation_progress(
                    loan_id,
                    Decimal::from(fill.quantity),
                    fill.proceeds_gc,
                    attempts,
                    self.clock.now(),
                )
                .is_err()
            {
                // Status moved under us; someone else finalized
                return Ok(());
            }
            info!(
                loan_id,
                lot,
                venue = %fill.venue,
                proceeds = %fill.proceeds_gc,
                attempts,
                "lot cleared"
            );
        }

        self.finalize(loan_id).await;
        Ok(())
    }

    /// Sleep until the book produces a mid-price again. Liquidation
    /// deferred on stale prices resumes automatically on the next tick.
    async fn await_mid_price(
        &self,
        worker_id: &str,
        loan_id: &str,
    ) -> Result<Decimal, Suspension> {
        let mut backoff = Backoff::new(STALE_BACKOFF_BASE, STALE_BACKOFF_CAP);
        loop {
            if let Some(mid) = self.book.mid_price() {
                return Ok(mid);
            }
            if !self
                .store
                .refresh_lease(loan_id, worker_id, lease_ttl(), self.clock.now())
            {
                return Err(Suspension::LeaseLost);
            }
            let delay = backoff.next_delay();
            debug!(loan_id, delay_ms = delay.as_millis() as u64, "no fresh prices, waiting");
            tokio::time::sleep(delay).await;
        }
    }

    /// Execute one lot, retrying the same lot until it clears. Every
    /// attempt goes out under a fresh client order id so the venue never
    /// de-duplicates a retry against a failed original.
    async fn trade_lot(
        &self,
        worker_id: &str,
        loan_id: &str,
        lot: u64,
    ) -> Result<(VenueFill, u32), Suspension> {
        let mut trade_backoff = Backoff::new(TRADE_BACKOFF_BASE, self.trade_backoff_cap);
        let mut stale_backoff = Backoff::new(STALE_BACKOFF_BASE, STALE_BACKOFF_CAP);
        let mut attempts = 0u32;

        loop {
            if !self
                .store
                .refresh_lease(loan_id, worker_id, lease_ttl(), self.clock.now())
            {
                return Err(Suspension::LeaseLost);
            }

            let Some((venue, quote)) = self.book.best_venue_for(lot) else {
                let delay = stale_backoff.next_delay();
                debug!(loan_id, lot, delay_ms = delay.as_millis() as u64, "both venues stale");
                tokio::time::sleep(delay).await;
                continue;
            };
            stale_backoff.reset();

            let client_order_id = Uuid::new_v4().to_string();
            attempts += 1;
            self.store.append_audit(AuditEntry::new(
                loan_id,
                self.clock.now(),
                AuditKind::TradeAttempt {
                    venue: venue.as_str().to_string(),
                    client_order_id: client_order_id.clone(),
                    quantity: lot,
                },
            ));
            debug!(loan_id, %venue, lot, %quote, %client_order_id, "placing sell order");

            match self.venues.client_for(venue).sell(&client_order_id, lot).await {
                Ok(fill) => {
                    self.store.append_audit(AuditEntry::new(
                        loan_id,
                        self.clock.now(),
                        AuditKind::TradeFilled {
                            venue: venue.as_str().to_string(),
                            client_order_id,
                            quantity: fill.quantity,
                            proceeds_gc: fill.proceeds_gc,
                        },
                    ));
                    return Ok((fill, attempts));
                }
                Err(e) => {
                    self.store.append_audit(AuditEntry::new(
                        loan_id,
                        self.clock.now(),
                        AuditKind::TradeFailed {
                            venue: venue.as_str().to_string(),
                            client_order_id,
                            reason: e.to_string(),
                        },
                    ));
                    let delay = trade_backoff.next_delay_jittered();
                    warn!(
                        loan_id,
                        %venue,
                        lot,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "trade attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// `liquidating -> liquidated` plus the loan's single liquidation
    /// event. A CAS loss means another worker already finalized.
    async fn finalize(&self, loan_id: &str) {
        let now = self.clock.now();
        let loan = match self.store.transition(
            loan_id,
            LoanStatus::Liquidating,
            LoanStatus::Liquidated,
            now,
            |_| {},
        ) {
            Ok(loan) => loan,
            Err(StoreError::StateConflict { .. }) => {
                debug!(loan_id, "already finalized elsewhere");
                return;
            }
            Err(e) => {
                warn!(loan_id, error = %e, "finalize failed");
                return;
            }
        };

        self.store.append_audit(AuditEntry::new(
            loan_id,
            now,
            AuditKind::Liquidated {
                collateral_sold: loan.collateral_sold,
                proceeds_gc: loan.proceeds_gc,
            },
        ));
        info!(
            loan_id,
            collateral_sold = %loan.collateral_sold,
            proceeds = %loan.proceeds_gc,
            outstanding = %loan.outstanding_balance(),
            "loan liquidated"
        );

        let event = LoanEvent::Liquidation {
            loan_id: loan_id.to_string(),
            collateral_sold: loan.collateral_sold,
            collateral_value: loan.proceeds_gc,
            remaining_collateral: loan.remaining_collateral(),
            outstanding_balance: loan.outstanding_balance(),
        };
        publish_with_audit(&self.publisher, &self.store, &event, now).await;
    }
}
