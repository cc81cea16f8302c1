//! LTV evaluator.
//!
//! Wakes on price ticks (debounced per venue) and on top-up probes,
//! recomputes LTV for `new` and `active` loans, and drives the two
//! policy transitions: activation at or under the activation threshold,
//! liquidation scheduling at or over the liquidation threshold. Racing
//! evaluators resolve on the store CAS, so each loan is enqueued once.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::engine::LiquidationQueue;
use crate::error::LendingError;
use crate::events::LoanEvent;
use crate::locks::KeyedLocks;
use crate::money::ltv_epsilon;
use crate::prices::PriceBook;
use crate::publisher::{publish_with_audit, EventPublisher};
use coruscant_api::Venue;
use coruscant_store::{AuditEntry, AuditKind, Loan, LoanStatus, MemoryLoanStore, StoreError};

/// At most one full evaluation per venue per window.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Loan-to-value: principal over collateral value at the current mid.
/// Unknown when the loan has no collateral or the mid is unusable.
pub fn ltv(loan: &Loan, mid: Decimal) -> Option<Decimal> {
    if mid <= Decimal::ZERO || loan.collateral <= Decimal::ZERO {
        return None;
    }
    Some(loan.principal / (loan.collateral * mid))
}

pub struct LtvEvaluator {
    store: Arc<MemoryLoanStore>,
    book: Arc<PriceBook>,
    publisher: Arc<EventPublisher>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
    queue: LiquidationQueue,
    activation_threshold: Decimal,
    liquidation_threshold: Decimal,
}

impl LtvEvaluator {
    pub fn new(
        store: Arc<MemoryLoanStore>,
        book: Arc<PriceBook>,
        publisher: Arc<EventPublisher>,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
        queue: LiquidationQueue,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            book,
            publisher,
            locks,
            clock,
            queue,
            activation_threshold: config.activation_threshold(),
            liquidation_threshold: config.liquidation_threshold(),
        }
    }

    /// Main loop: tick notifications from the price book plus top-up
    /// probes from the lifecycle engine.
    pub async fn run(
        self: Arc<Self>,
        mut ticks: mpsc::UnboundedReceiver<Venue>,
        mut probes: mpsc::UnboundedReceiver<String>,
    ) {
        info!(
            activation = %self.activation_threshold,
            liquidation = %self.liquidation_threshold,
            "LTV evaluator running"
        );
        let mut last_eval: HashMap<Venue, Instant> = HashMap::new();

        loop {
            tokio::select! {
                tick = ticks.recv() => match tick {
                    Some(venue) => {
                        let now = Instant::now();
                        if let Some(previous) = last_eval.get(&venue) {
                            if now.duration_since(*previous) < DEBOUNCE {
                                continue;
                            }
                        }
                        last_eval.insert(venue, now);
                        self.evaluate_all().await;
                    }
                    None => break,
                },
                probe = probes.recv() => match probe {
                    Some(loan_id) => self.evaluate_loan(&loan_id).await,
                    None => break,
                },
            }
        }
        info!("LTV evaluator stopped");
    }

    /// Evaluate every loan still subject to policy. No fresh mid means
    /// no action: stale prices never force a liquidation.
    pub async fn evaluate_all(&self) {
        let Some(mid) = self.book.mid_price() else {
            debug!("mid-price unknown, skipping evaluation");
            return;
        };
        for loan in self.store.list() {
            if matches!(loan.status, LoanStatus::New | LoanStatus::Active) {
                self.evaluate(loan, mid).await;
            }
        }
    }

    /// Evaluate a single loan (top-up probe path).
    pub async fn evaluate_loan(&self, loan_id: &str) {
        let Some(mid) = self.book.mid_price() else {
            return;
        };
        let Some(loan) = self.store.get(loan_id) else {
            return;
        };
        self.evaluate(loan, mid).await;
    }

    async fn evaluate(&self, loan: Loan, mid: Decimal) {
        let Some(ltv) = ltv(&loan, mid) else {
            return;
        };
        let eps = ltv_epsilon();

        match loan.status {
            LoanStatus::New if ltv <= self.activation_threshold + eps => {
                self.activate(&loan, ltv).await;
            }
            LoanStatus::Active if ltv >= self.liquidation_threshold - eps => {
                self.schedule_liquidation(&loan, ltv).await;
            }
            _ => {}
        }
    }

    async fn activate(&self, loan: &Loan, ltv: Decimal) {
        let _guard = self.locks.lock(&loan.loan_id).await;
        let now = self.clock.now();

        let updated = match self.store.transition(
            &loan.loan_id,
            LoanStatus::New,
            LoanStatus::Active,
            now,
            |_| {},
        ) {
            Ok(updated) => updated,
            Err(StoreError::StateConflict { .. }) => return, // raced
            Err(e) => {
                warn!(loan_id = %loan.loan_id, error = %LendingError::from(e), "activation failed");
                return;
            }
        };

        self.store
            .append_audit(AuditEntry::new(loan.loan_id.as_str(), now, AuditKind::Activated));
        info!(loan_id = %loan.loan_id, %ltv, "loan activated");

        let event = LoanEvent::Activation {
            loan_id: loan.loan_id.clone(),
            outstanding_balance: updated.outstanding_balance(),
        };
        publish_with_audit(&self.publisher, &self.store, &event, now).await;
    }

    async fn schedule_liquidation(&self, loan: &Loan, ltv: Decimal) {
        let _guard = self.locks.lock(&loan.loan_id).await;
        let now = self.clock.now();

        match self.store.transition(
            &loan.loan_id,
            LoanStatus::Active,
            LoanStatus::Liquidating,
            now,
            |_| {},
        ) {
            Ok(_) => {}
            Err(StoreError::StateConflict { .. }) => return, // raced
            Err(e) => {
                warn!(loan_id = %loan.loan_id, error = %LendingError::from(e), "liquidation scheduling failed");
                return;
            }
        }

        self.store.append_audit(AuditEntry::new(
            loan.loan_id.as_str(),
            now,
            AuditKind::LiquidationScheduled,
        ));
        info!(loan_id = %loan.loan_id, %ltv, "LTV breach, liquidation scheduled");

        if !self.queue.try_enqueue(&loan.loan_id) {
            // Already liquidating; the recovery sweep will find it
            warn!(loan_id = %loan.loan_id, "liquidation queue full, enqueue deferred");
        }
    }
}
