//! In-memory loan store.
//!
//! Backs the persistence contract with dashmap: per-key shard locking
//! gives atomic single-loan mutations, the entry API gives unique inserts
//! for loans, request ids, and leases. Any store with atomic status CAS
//! and unique request-id insert could replace this behind the same
//! surface.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::audit::AuditEntry;
use crate::error::StoreError;
use crate::lease::Lease;
use crate::loan::{Loan, LoanStatus};
use crate::request::ProcessedRequest;

/// Loan, idempotency, audit, and lease state for the whole process.
pub struct MemoryLoanStore {
    loans: DashMap<String, Loan>,
    requests: DashMap<String, ProcessedRequest>,
    audit: RwLock<Vec<AuditEntry>>,
    leases: DashMap<String, Lease>,
}

impl MemoryLoanStore {
    pub fn new() -> Self {
        Self {
            loans: DashMap::new(),
            requests: DashMap::new(),
            audit: RwLock::new(Vec::new()),
            leases: DashMap::new(),
        }
    }

    // Loans

    /// Create a loan in status `new` with zero collateral.
    pub fn create_loan(
        &self,
        loan_id: &str,
        borrower_id: &str,
        principal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Loan, StoreError> {
        match self.loans.entry(loan_id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(loan_id.to_string())),
            Entry::Vacant(slot) => {
                let loan = Loan::new(loan_id, borrower_id, principal, now);
                slot.insert(loan.clone());
                debug!(loan_id, borrower_id, %principal, "loan created");
                Ok(loan)
            }
        }
    }

    pub fn get(&self, loan_id: &str) -> Option<Loan> {
        self.loans.get(loan_id).map(|l| l.value().clone())
    }

    /// Increase collateral on a loan that has not started liquidating.
    /// Returns the post-mutation snapshot.
    pub fn add_collateral(
        &self,
        loan_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Loan, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::Invariant {
                loan_id: loan_id.to_string(),
                violation: "top-up amount must be positive",
            });
        }

        let mut entry = self
            .loans
            .get_mut(loan_id)
            .ok_or_else(|| StoreError::NotFound(loan_id.to_string()))?;
        let loan = entry.value_mut();

        if !loan.status.accepts_top_up() {
            return Err(StoreError::Terminal {
                loan_id: loan_id.to_string(),
                status: loan.status,
            });
        }

        loan.collateral += amount;
        loan.updated_at = now;
        Ok(loan.clone())
    }

    /// Compare-and-swap on status, with a mutator applied in the same
    /// atomic step. The mutator may update sale bookkeeping but not
    /// identity, principal, collateral, or status.
    pub fn transition<F>(
        &self,
        loan_id: &str,
        from: LoanStatus,
        to: LoanStatus,
        now: DateTime<Utc>,
        mutate: F,
    ) -> Result<Loan, StoreError>
    where
        F: FnOnce(&mut Loan),
    {
        if !from.can_advance_to(to) {
            return Err(StoreError::Invariant {
                loan_id: loan_id.to_string(),
                violation: "illegal status transition",
            });
        }

        let mut entry = self
            .loans
            .get_mut(loan_id)
            .ok_or_else(|| StoreError::NotFound(loan_id.to_string()))?;
        let loan = entry.value_mut();

        if loan.status != from {
            return Err(StoreError::StateConflict {
                loan_id: loan_id.to_string(),
                expected: from,
                found: loan.status,
            });
        }

        // Validate the mutator against a scratch copy so a misbehaving
        // closure never leaves partial state behind.
        let mut next = loan.clone();
        mutate(&mut next);

        let violation = if next.loan_id != loan.loan_id || next.borrower_id != loan.borrower_id {
            Some("loan identity is immutable")
        } else if next.principal != loan.principal {
            Some("principal is immutable")
        } else if next.collateral != loan.collateral {
            Some("mutator may not change collateral")
        } else if next.status != loan.status {
            Some("mutator may not change status")
        } else {
            None
        };
        if let Some(violation) = violation {
            return Err(StoreError::Invariant {
                loan_id: loan_id.to_string(),
                violation,
            });
        }

        next.status = to;
        next.updated_at = now;
        *loan = next.clone();

        debug!(loan_id, from = %from, to = %to, "loan transitioned");
        Ok(next)
    }

    /// Record a filled lot against a loan under liquidation. Progress is
    /// persisted per fill so a restarted worker resumes from the loan
    /// instead of reselling.
    pub fn record_liquidation_progress(
        &self,
        loan_id: &str,
        quantity: Decimal,
        proceeds_gc: Decimal,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Loan, StoreError> {
        let mut entry = self
            .loans
            .get_mut(loan_id)
            .ok_or_else(|| StoreError::NotFound(loan_id.to_string()))?;
        let loan = entry.value_mut();

        if loan.status != LoanStatus::Liquidating {
            return Err(StoreError::StateConflict {
                loan_id: loan_id.to_string(),
                expected: LoanStatus::Liquidating,
                found: loan.status,
            });
        }
        if loan.collateral_sold + quantity > loan.collateral {
            return Err(StoreError::Invariant {
                loan_id: loan_id.to_string(),
                violation: "cannot sell more collateral than posted",
            });
        }

        loan.collateral_sold += quantity;
        loan.proceeds_gc += proceeds_gc;
        loan.liquidation_attempts += attempts;
        loan.updated_at = now;
        Ok(loan.clone())
    }

    /// Snapshot of all loans, ordered by loan id.
    pub fn list(&self) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self.loans.iter().map(|l| l.value().clone()).collect();
        loans.sort_by(|a, b| a.loan_id.cmp(&b.loan_id));
        loans
    }

    /// Loans currently in the given status (startup scan, recovery sweep).
    pub fn loans_in_status(&self, status: LoanStatus) -> Vec<Loan> {
        self.loans
            .iter()
            .filter(|l| l.status == status)
            .map(|l| l.value().clone())
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for loan in self.loans.iter() {
            match loan.status {
                LoanStatus::New => stats.new_count += 1,
                LoanStatus::Active => stats.active_count += 1,
                LoanStatus::Liquidating => stats.liquidating_count += 1,
                LoanStatus::Liquidated => stats.liquidated_count += 1,
            }
        }
        stats
    }

    // Idempotency

    /// Record the terminal outcome of a request. Returns the existing
    /// record (no side effects) when the request id was already seen.
    pub fn record_request(&self, record: ProcessedRequest) -> Result<(), ProcessedRequest> {
        match self.requests.entry(record.request_id.clone()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    pub fn lookup_request(&self, request_id: &str) -> Option<ProcessedRequest> {
        self.requests.get(request_id).map(|r| r.value().clone())
    }

    // Audit

    pub fn append_audit(&self, entry: AuditEntry) {
        self.audit.write().push(entry);
    }

    /// Audit entries for one loan, in append order.
    pub fn audit_for(&self, loan_id: &str) -> Vec<AuditEntry> {
        self.audit
            .read()
            .iter()
            .filter(|e| e.loan_id == loan_id)
            .cloned()
            .collect()
    }

    // Leases

    /// Take the lease on a loan. Succeeds when no lease exists or the
    /// current one has expired.
    pub fn acquire_lease(
        &self,
        loan_id: &str,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let lease = Lease {
            owner: owner.to_string(),
            expires_at: now + ttl,
        };
        match self.leases.entry(loan_id.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired(now) {
                    existing.insert(lease);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(lease);
                true
            }
        }
    }

    /// Extend a lease still held by `owner`. Fails once the lease has
    /// expired or changed hands; the worker must then abandon the job.
    pub fn refresh_lease(
        &self,
        loan_id: &str,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.leases.get_mut(loan_id) {
            Some(mut lease) if lease.held_by(owner, now) => {
                lease.expires_at = now + ttl;
                true
            }
            _ => false,
        }
    }

    pub fn release_lease(&self, loan_id: &str, owner: &str) {
        self.leases.remove_if(loan_id, |_, lease| lease.owner == owner);
    }
}

impl Default for MemoryLoanStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-status loan counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub new_count: usize,
    pub active_count: usize,
    pub liquidating_count: usize,
    pub liquidated_count: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.new_count + self.active_count + self.liquidating_count + self.liquidated_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestOutcome;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_create_and_duplicate() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();

        let loan = store.create_loan("L1", "B1", dec("1000"), now).unwrap();
        assert_eq!(loan.status, LoanStatus::New);
        assert_eq!(loan.collateral, Decimal::ZERO);

        let err = store.create_loan("L1", "B2", dec("500"), now).unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists("L1".into()));
        // First write wins
        assert_eq!(store.get("L1").unwrap().borrower_id, "B1");
    }

    #[test]
    fn test_add_collateral() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        store.create_loan("L1", "B1", dec("1000"), now).unwrap();

        let loan = store.add_collateral("L1", dec("12.5"), now).unwrap();
        assert_eq!(loan.collateral, dec("12.5"));
        let loan = store.add_collateral("L1", dec("7.5"), now).unwrap();
        assert_eq!(loan.collateral, dec("20"));

        assert_eq!(
            store.add_collateral("missing", dec("1"), now).unwrap_err(),
            StoreError::NotFound("missing".into())
        );
        assert!(matches!(
            store.add_collateral("L1", dec("0"), now).unwrap_err(),
            StoreError::Invariant { .. }
        ));
    }

    #[test]
    fn test_top_up_rejected_once_liquidating() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        store.create_loan("L1", "B1", dec("1000"), now).unwrap();
        store.add_collateral("L1", dec("40"), now).unwrap();
        store
            .transition("L1", LoanStatus::New, LoanStatus::Active, now, |_| {})
            .unwrap();
        store
            .transition("L1", LoanStatus::Active, LoanStatus::Liquidating, now, |_| {})
            .unwrap();

        let err = store.add_collateral("L1", dec("5"), now).unwrap_err();
        assert_eq!(
            err,
            StoreError::Terminal {
                loan_id: "L1".into(),
                status: LoanStatus::Liquidating,
            }
        );
        // No mutation happened
        assert_eq!(store.get("L1").unwrap().collateral, dec("40"));
    }

    #[test]
    fn test_transition_cas() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        store.create_loan("L1", "B1", dec("1000"), now).unwrap();

        store
            .transition("L1", LoanStatus::New, LoanStatus::Active, now, |_| {})
            .unwrap();

        // Second racer loses the CAS
        let err = store
            .transition("L1", LoanStatus::New, LoanStatus::Active, now, |_| {})
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::StateConflict {
                loan_id: "L1".into(),
                expected: LoanStatus::New,
                found: LoanStatus::Active,
            }
        );

        // Illegal pair is refused outright
        assert!(matches!(
            store
                .transition("L1", LoanStatus::Active, LoanStatus::Liquidated, now, |_| {})
                .unwrap_err(),
            StoreError::Invariant { .. }
        ));
    }

    #[test]
    fn test_transition_mutator_guard() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        store.create_loan("L1", "B1", dec("1000"), now).unwrap();

        let err = store
            .transition("L1", LoanStatus::New, LoanStatus::Active, now, |loan| {
                loan.principal = dec("1");
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Invariant { .. }));
        // The loan is untouched
        let loan = store.get("L1").unwrap();
        assert_eq!(loan.principal, dec("1000"));
        assert_eq!(loan.status, LoanStatus::New);
    }

    #[test]
    fn test_finalize_mutator_records_sale() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        store.create_loan("L1", "B1", dec("1000"), now).unwrap();
        store.add_collateral("L1", dec("40"), now).unwrap();
        store
            .transition("L1", LoanStatus::New, LoanStatus::Active, now, |_| {})
            .unwrap();
        store
            .transition("L1", LoanStatus::Active, LoanStatus::Liquidating, now, |_| {})
            .unwrap();

        let loan = store
            .transition(
                "L1",
                LoanStatus::Liquidating,
                LoanStatus::Liquidated,
                now,
                |loan| {
                    loan.collateral_sold = dec("20");
                    loan.proceeds_gc = dec("1000");
                    loan.liquidation_attempts = 3;
                },
            )
            .unwrap();

        assert_eq!(loan.status, LoanStatus::Liquidated);
        assert_eq!(loan.outstanding_balance(), Decimal::ZERO);
        assert_eq!(loan.remaining_collateral(), dec("20"));
    }

    #[test]
    fn test_liquidation_progress() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        store.create_loan("L1", "B1", dec("1000"), now).unwrap();
        store.add_collateral("L1", dec("40"), now).unwrap();

        // Only liquidating loans accumulate progress
        assert!(matches!(
            store
                .record_liquidation_progress("L1", dec("10"), dec("500"), 1, now)
                .unwrap_err(),
            StoreError::StateConflict { .. }
        ));

        store
            .transition("L1", LoanStatus::New, LoanStatus::Active, now, |_| {})
            .unwrap();
        store
            .transition("L1", LoanStatus::Active, LoanStatus::Liquidating, now, |_| {})
            .unwrap();

        let loan = store
            .record_liquidation_progress("L1", dec("10"), dec("500"), 2, now)
            .unwrap();
        assert_eq!(loan.collateral_sold, dec("10"));
        assert_eq!(loan.proceeds_gc, dec("500"));
        assert_eq!(loan.liquidation_attempts, 2);

        // Selling beyond posted collateral is refused
        assert!(matches!(
            store
                .record_liquidation_progress("L1", dec("31"), dec("1550"), 1, now)
                .unwrap_err(),
            StoreError::Invariant { .. }
        ));
    }

    #[test]
    fn test_request_idempotency() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        let record = ProcessedRequest {
            request_id: "r-1".into(),
            outcome: RequestOutcome::Accepted,
            at: now,
        };

        assert!(store.record_request(record.clone()).is_ok());
        let existing = store.record_request(record).unwrap_err();
        assert!(existing.outcome.is_accepted());
        assert_eq!(store.lookup_request("r-1").unwrap().request_id, "r-1");
        assert!(store.lookup_request("r-2").is_none());
    }

    #[test]
    fn test_lease_lifecycle() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        let ttl = Duration::seconds(30);

        assert!(store.acquire_lease("L1", "w-a", ttl, now));
        // Held lease cannot be stolen
        assert!(!store.acquire_lease("L1", "w-b", ttl, now));
        // Owner refreshes fine
        assert!(store.refresh_lease("L1", "w-a", ttl, now + Duration::seconds(10)));
        // Non-owner cannot refresh
        assert!(!store.refresh_lease("L1", "w-b", ttl, now));

        // After expiry anyone may take it, and the old owner's refresh fails
        let later = now + Duration::seconds(120);
        assert!(store.acquire_lease("L1", "w-b", ttl, later));
        assert!(!store.refresh_lease("L1", "w-a", ttl, later));

        store.release_lease("L1", "w-b");
        assert!(store.acquire_lease("L1", "w-c", ttl, later));
    }

    #[test]
    fn test_list_and_scan() {
        let store = MemoryLoanStore::new();
        let now = Utc::now();
        store.create_loan("L2", "B1", dec("100"), now).unwrap();
        store.create_loan("L1", "B2", dec("200"), now).unwrap();
        store
            .transition("L2", LoanStatus::New, LoanStatus::Active, now, |_| {})
            .unwrap();
        store
            .transition("L2", LoanStatus::Active, LoanStatus::Liquidating, now, |_| {})
            .unwrap();

        let all = store.list();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].loan_id, "L1");

        let scanning = store.loans_in_status(LoanStatus::Liquidating);
        assert_eq!(scanning.len(), 1);
        assert_eq!(scanning[0].loan_id, "L2");

        let stats = store.stats();
        assert_eq!(stats.new_count, 1);
        assert_eq!(stats.liquidating_count, 1);
        assert_eq!(stats.total(), 2);
    }
}
