//! Domain error taxonomy.
//!
//! Only validation, idempotency, and domain conflicts ever reach the
//! HTTP caller; everything else is absorbed by retry loops or process
//! restart.

use coruscant_store::{LoanStatus, ProcessedRequest, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LendingError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request id was already processed; carries the stored outcome.
    #[error("request {} already processed", original.request_id)]
    DuplicateRequest { original: ProcessedRequest },

    #[error("loan {0} not found")]
    NotFound(String),

    /// Loan id exists with different terms.
    #[error("loan {0} already exists with different terms")]
    Conflict(String),

    #[error("borrower mismatch for loan {0}")]
    BorrowerMismatch(String),

    #[error("loan {loan_id} no longer accepts this operation (status {status})")]
    Terminal {
        loan_id: String,
        status: LoanStatus,
    },

    #[error("state conflict on loan {0}")]
    StateConflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for LendingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(id) => Self::Conflict(id),
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Terminal { loan_id, status } => Self::Terminal { loan_id, status },
            StoreError::StateConflict { loan_id, .. } => Self::StateConflict(loan_id),
            StoreError::Invariant { .. } => Self::Internal(err.to_string()),
        }
    }
}
