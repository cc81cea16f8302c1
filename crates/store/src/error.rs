//! Typed store errors.

use crate::loan::LoanStatus;

/// Errors returned by loan store operations.
///
/// Every variant is a domain conflict the caller must handle; none of them
/// are retryable by the core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("loan {0} already exists")]
    AlreadyExists(String),

    #[error("loan {0} not found")]
    NotFound(String),

    #[error("loan {loan_id} no longer accepts mutation (status {status})")]
    Terminal { loan_id: String, status: LoanStatus },

    #[error("loan {loan_id}: expected status {expected}, found {found}")]
    StateConflict {
        loan_id: String,
        expected: LoanStatus,
        found: LoanStatus,
    },

    #[error("loan {loan_id}: {violation}")]
    Invariant {
        loan_id: String,
        violation: &'static str,
    },
}
