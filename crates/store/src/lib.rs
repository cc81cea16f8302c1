//! Durable state for the Coruscant loan liquidation service.
//!
//! This crate owns everything the rest of the system persists:
//! - Loans and their forward-only status lifecycle
//! - Processed-request records (idempotency keys)
//! - The append-only audit log
//! - Liquidation leases (one worker per loan)
//!
//! The store serializes all mutations on a single loan and enforces the
//! loan invariants on every write; callers get typed errors back instead
//! of partially applied state.

mod audit;
mod error;
mod lease;
mod loan;
mod memory;
mod request;

pub use audit::{AuditEntry, AuditKind};
pub use error::StoreError;
pub use lease::Lease;
pub use loan::{Loan, LoanStatus};
pub use memory::{MemoryLoanStore, StoreStats};
pub use request::{ProcessedRequest, RequestOutcome};
