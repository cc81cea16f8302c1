//! Lifecycle engine: validated, idempotent inbound request handling.
//!
//! All writes to one loan serialize through its keyed lock; the event
//! for a transition is emitted after the store commit and before the
//! lock releases, so per-loan event order matches state order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::clock::Clock;
use crate::error::LendingError;
use crate::events::LoanEvent;
use crate::locks::KeyedLocks;
use crate::money::parse_amount;
use crate::publisher::EventPublisher;
use coruscant_store::{
    AuditEntry, AuditKind, Loan, MemoryLoanStore, ProcessedRequest, RequestOutcome, StoreError,
};

const MAX_ID_LEN: usize = 128;

/// Acknowledgement returned for an accepted submission.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub accepted: bool,
}

pub struct LifecycleEngine {
    store: Arc<MemoryLoanStore>,
    publisher: Arc<EventPublisher>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
    /// Nudges the evaluator after a successful top-up so activation does
    /// not have to wait for the next tick.
    activation_probe: Option<mpsc::UnboundedSender<String>>,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<MemoryLoanStore>,
        publisher: Arc<EventPublisher>,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            locks,
            clock,
            activation_probe: None,
        }
    }

    pub fn with_activation_probe(mut self, probe: mpsc::UnboundedSender<String>) -> Self {
        self.activation_probe = Some(probe);
        self
    }

    /// Register a loan application.
    #[instrument(skip(self))]
    pub async fn submit_application(
        &self,
        request_id: &str,
        loan_id: &str,
        borrower_id: &str,
        amount: &str,
    ) -> Result<SubmissionReceipt, LendingError> {
        if let Some(original) = self.store.lookup_request(request_id) {
            return Err(LendingError::DuplicateRequest { original });
        }

        validate_id("requestId", request_id)?;
        let now = self.clock.now();
        if let Err(e) = self.validate_application(loan_id, borrower_id, amount) {
            self.record_rejection(request_id, &e, now);
            return Err(e);
        }
        let principal = parse_positive_amount("amount", amount)?;

        let _guard = self.locks.lock(loan_id).await;

        // Re-check under the loan lock: a concurrent twin of this request
        // may have landed between the first lookup and here
        if let Some(original) = self.store.lookup_request(request_id) {
            return Err(LendingError::DuplicateRequest { original });
        }

        let created = match self.store.create_loan(loan_id, borrower_id, principal, now) {
            Ok(loan) => Some(loan),
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self.store.get(loan_id).ok_or_else(|| {
                    LendingError::Internal(format!("loan {loan_id} vanished during create"))
                })?;
                if existing.borrower_id == borrower_id && existing.principal == principal {
                    // Same terms resubmitted under a new request id
                    None
                } else {
                    let err = LendingError::Conflict(loan_id.to_string());
                    self.record_rejection(request_id, &err, now);
                    return Err(err);
                }
            }
            Err(e) => return Err(e.into()),
        };

        if created.is_some() {
            self.store.append_audit(AuditEntry::new(
                loan_id,
                now,
                AuditKind::ApplicationAccepted {
                    request_id: request_id.to_string(),
                    principal,
                },
            ));
            info!(loan_id, borrower_id, %principal, "application accepted");

            let event = LoanEvent::Application {
                loan_id: loan_id.to_string(),
                amount: principal,
            };
            self.emit(&event, now).await;
        }

        self.record_acceptance(request_id, now)?;
        Ok(SubmissionReceipt {
            request_id: request_id.to_string(),
            timestamp: now,
            accepted: true,
        })
    }

    /// Post additional collateral against a loan.
    #[instrument(skip(self))]
    pub async fn submit_top_up(
        &self,
        request_id: &str,
        loan_id: &str,
        borrower_id: &str,
        amount: &str,
    ) -> Result<SubmissionReceipt, LendingError> {
        if let Some(original) = self.store.lookup_request(request_id) {
            return Err(LendingError::DuplicateRequest { original });
        }

        validate_id("requestId", request_id)?;
        let now = self.clock.now();
        if let Err(e) = self.validate_application(loan_id, borrower_id, amount) {
            self.record_rejection(request_id, &e, now);
            return Err(e);
        }
        let amount = parse_positive_amount("amount", amount)?;

        let _guard = self.locks.lock(loan_id).await;

        if let Some(original) = self.store.lookup_request(request_id) {
            return Err(LendingError::DuplicateRequest { original });
        }

        let result = self.apply_top_up(loan_id, borrower_id, amount, now);
        let loan = match result {
            Ok(loan) => loan,
            Err(e) => {
                self.record_rejection(request_id, &e, now);
                return Err(e);
            }
        };

        self.store.append_audit(AuditEntry::new(
            loan_id,
            now,
            AuditKind::CollateralTopUp {
                request_id: request_id.to_string(),
                amount,
            },
        ));
        info!(loan_id, %amount, collateral = %loan.collateral, "collateral topped up");

        self.record_acceptance(request_id, now)?;

        if let Some(probe) = &self.activation_probe {
            let _ = probe.send(loan_id.to_string());
        }

        Ok(SubmissionReceipt {
            request_id: request_id.to_string(),
            timestamp: now,
            accepted: true,
        })
    }

    pub fn list_loans(&self) -> Vec<Loan> {
        self.store.list()
    }

    fn apply_top_up(
        &self,
        loan_id: &str,
        borrower_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Loan, LendingError> {
        let loan = self
            .store
            .get(loan_id)
            .ok_or_else(|| LendingError::NotFound(loan_id.to_string()))?;

        if loan.borrower_id != borrower_id {
            return Err(LendingError::BorrowerMismatch(loan_id.to_string()));
        }
        if !loan.status.accepts_top_up() {
            return Err(LendingError::Terminal {
                loan_id: loan_id.to_string(),
                status: loan.status,
            });
        }

        Ok(self.store.add_collateral(loan_id, amount, now)?)
    }

    fn validate_application(
        &self,
        loan_id: &str,
        borrower_id: &str,
        amount: &str,
    ) -> Result<(), LendingError> {
        validate_id("loanId", loan_id)?;
        validate_id("borrowerId", borrower_id)?;
        parse_positive_amount("amount", amount)?;
        Ok(())
    }

    async fn emit(&self, event: &LoanEvent, now: DateTime<Utc>) {
        crate::publisher::publish_with_audit(&self.publisher, &self.store, event, now).await;
    }

    fn record_acceptance(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LendingError> {
        let record = ProcessedRequest {
            request_id: request_id.to_string(),
            outcome: RequestOutcome::Accepted,
            at: now,
        };
        self.store
            .record_request(record)
            .map_err(|original| LendingError::DuplicateRequest { original })
    }

    fn record_rejection(&self, request_id: &str, error: &LendingError, now: DateTime<Utc>) {
        // Best effort; a racing duplicate already recorded the outcome
        let _ = self.store.record_request(ProcessedRequest {
            request_id: request_id.to_string(),
            outcome: RequestOutcome::Rejected {
                reason: error.to_string(),
            },
            at: now,
        });
    }
}

fn validate_id(field: &str, value: &str) -> Result<(), LendingError> {
    if value.is_empty() {
        return Err(LendingError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(LendingError::Validation(format!(
            "{field} exceeds {MAX_ID_LEN} characters"
        )));
    }
    Ok(())
}

fn parse_positive_amount(field: &str, raw: &str) -> Result<Decimal, LendingError> {
    let amount = parse_amount(raw)
        .ok_or_else(|| LendingError::Validation(format!("{field} is not a decimal: {raw:?}")))?;
    if amount <= Decimal::ZERO {
        return Err(LendingError::Validation(format!(
            "{field} must be positive, got {raw}"
        )));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use coruscant_api::{BusConsumer, MemoryBus};
    use coruscant_store::LoanStatus;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        engine: LifecycleEngine,
        store: Arc<MemoryLoanStore>,
        events: UnboundedReceiver<Value>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryLoanStore::new());
        let bus = Arc::new(MemoryBus::new());
        let events = bus.subscribe("loan-events").await.unwrap();
        let publisher = Arc::new(EventPublisher::new(bus, "loan-events"));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = LifecycleEngine::new(
            store.clone(),
            publisher,
            Arc::new(KeyedLocks::new()),
            clock,
        );
        Fixture {
            engine,
            store,
            events,
        }
    }

    #[tokio::test]
    async fn test_application_creates_loan_and_emits_event() {
        let mut fx = fixture().await;

        let receipt = fx
            .engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap();
        assert!(receipt.accepted);

        let loan = fx.store.get("L1").unwrap();
        assert_eq!(loan.status, LoanStatus::New);
        assert_eq!(loan.principal, Decimal::from(1000));
        assert_eq!(loan.collateral, Decimal::ZERO);

        let event = fx.events.recv().await.unwrap();
        assert_eq!(event["eventType"], "application");
        assert_eq!(event["loanId"], "L1");
        assert_eq!(event["amount"], "1000");
        assert_eq!(event["status"], "new");
    }

    #[tokio::test]
    async fn test_duplicate_request_id_is_a_no_op() {
        let mut fx = fixture().await;

        fx.engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap();
        let err = fx
            .engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap_err();

        match err {
            LendingError::DuplicateRequest { original } => {
                assert!(original.outcome.is_accepted());
            }
            other => panic!("expected duplicate, got {other:?}"),
        }

        // Exactly one loan, exactly one event
        assert_eq!(fx.store.list().len(), 1);
        assert!(fx.events.recv().await.is_some());
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_matching_resubmit_is_idempotent_without_second_event() {
        let mut fx = fixture().await;

        fx.engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap();
        // Fresh request id, same terms
        let receipt = fx
            .engine
            .submit_application("r-2", "L1", "B1", "1000")
            .await
            .unwrap();
        assert!(receipt.accepted);

        assert!(fx.events.recv().await.is_some());
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mismatched_resubmit_conflicts() {
        let fx = fixture().await;

        fx.engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap();
        let err = fx
            .engine
            .submit_application("r-2", "L1", "B1", "2000")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_input() {
        let fx = fixture().await;

        let err = fx
            .engine
            .submit_application("r-1", "", "B1", "1000")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        let err = fx
            .engine
            .submit_application("r-2", "L1", "B1", "-5")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        let err = fx
            .engine
            .submit_application("r-3", "L1", "B1", "many credits")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        let long_id = "x".repeat(129);
        let err = fx
            .engine
            .submit_application("r-4", &long_id, "B1", "1000")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        assert!(fx.store.list().is_empty());
    }

    #[tokio::test]
    async fn test_top_up_accumulates_once_per_request_id() {
        let fx = fixture().await;

        fx.engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap();
        fx.engine
            .submit_top_up("r-2", "L1", "B1", "5")
            .await
            .unwrap();

        // Same request id replayed: rejected as duplicate, no change
        let err = fx
            .engine
            .submit_top_up("r-2", "L1", "B1", "5")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::DuplicateRequest { .. }));
        assert_eq!(fx.store.get("L1").unwrap().collateral, Decimal::from(5));
    }

    #[tokio::test]
    async fn test_top_up_rejections() {
        let fx = fixture().await;

        fx.engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap();

        let err = fx
            .engine
            .submit_top_up("r-2", "missing", "B1", "5")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::NotFound(_)));

        let err = fx
            .engine
            .submit_top_up("r-3", "L1", "B2", "5")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::BorrowerMismatch(_)));
    }

    #[tokio::test]
    async fn test_top_up_rejected_on_terminal_loan() {
        let fx = fixture().await;
        let now = Utc::now();

        fx.engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap();
        fx.engine
            .submit_top_up("r-2", "L1", "B1", "40")
            .await
            .unwrap();

        // Walk the loan to liquidated
        fx.store
            .transition("L1", LoanStatus::New, LoanStatus::Active, now, |_| {})
            .unwrap();
        fx.store
            .transition("L1", LoanStatus::Active, LoanStatus::Liquidating, now, |_| {})
            .unwrap();
        fx.store
            .transition("L1", LoanStatus::Liquidating, LoanStatus::Liquidated, now, |_| {})
            .unwrap();

        let err = fx
            .engine
            .submit_top_up("r-4", "L1", "B1", "5")
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Terminal { .. }));
        assert_eq!(fx.store.get("L1").unwrap().collateral, Decimal::from(40));
    }

    #[tokio::test]
    async fn test_audit_trail_written() {
        let fx = fixture().await;

        fx.engine
            .submit_application("r-1", "L1", "B1", "1000")
            .await
            .unwrap();
        fx.engine
            .submit_top_up("r-2", "L1", "B1", "5")
            .await
            .unwrap();

        let audit = fx.store.audit_for("L1");
        assert_eq!(audit.len(), 2);
        assert!(matches!(audit[0].kind, AuditKind::ApplicationAccepted { .. }));
        assert!(matches!(audit[1].kind, AuditKind::CollateralTopUp { .. }));
    }
}
