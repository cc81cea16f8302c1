//! Loan entity and its status lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a loan. Progresses strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    New,
    Active,
    Liquidating,
    Liquidated,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Active => "active",
            Self::Liquidating => "liquidating",
            Self::Liquidated => "liquidated",
        }
    }

    /// Position in the lifecycle, used for ordering and event versioning.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Active => 1,
            Self::Liquidating => 2,
            Self::Liquidated => 3,
        }
    }

    /// Whether `self -> next` is one of the legal transitions.
    pub fn can_advance_to(&self, next: LoanStatus) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Active)
                | (Self::Active, Self::Liquidating)
                | (Self::Liquidating, Self::Liquidated)
        )
    }

    /// Top-ups are only accepted before liquidation begins.
    pub fn accepts_top_up(&self) -> bool {
        matches!(self, Self::New | Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Liquidated)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central entity: a Beskar-collateralized loan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    /// Externally assigned opaque identifier
    pub loan_id: String,
    /// Borrower the loan belongs to
    pub borrower_id: String,
    /// Disbursed amount in GC; immutable after creation
    pub principal: Decimal,
    /// Posted collateral in BSK; non-decreasing until liquidation starts
    pub collateral: Decimal,
    /// Lifecycle status
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Trade attempts issued while liquidating (diagnostic counter)
    pub liquidation_attempts: u32,
    /// BSK sold so far
    pub collateral_sold: Decimal,
    /// GC realized from sales so far
    pub proceeds_gc: Decimal,
}

impl Loan {
    pub fn new(
        loan_id: impl Into<String>,
        borrower_id: impl Into<String>,
        principal: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            loan_id: loan_id.into(),
            borrower_id: borrower_id.into(),
            principal,
            collateral: Decimal::ZERO,
            status: LoanStatus::New,
            created_at: now,
            updated_at: now,
            liquidation_attempts: 0,
            collateral_sold: Decimal::ZERO,
            proceeds_gc: Decimal::ZERO,
        }
    }

    /// Principal not yet covered by sale proceeds, floored at zero.
    pub fn outstanding_balance(&self) -> Decimal {
        (self.principal - self.proceeds_gc).max(Decimal::ZERO)
    }

    /// Collateral not yet sold, floored at zero.
    pub fn remaining_collateral(&self) -> Decimal {
        (self.collateral - self.collateral_sold).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions_only() {
        use LoanStatus::*;
        assert!(New.can_advance_to(Active));
        assert!(Active.can_advance_to(Liquidating));
        assert!(Liquidating.can_advance_to(Liquidated));

        // No reverse or skipping transitions
        assert!(!Active.can_advance_to(New));
        assert!(!Liquidating.can_advance_to(Active));
        assert!(!New.can_advance_to(Liquidating));
        assert!(!New.can_advance_to(Liquidated));
        assert!(!Liquidated.can_advance_to(Liquidating));
    }

    #[test]
    fn test_top_up_acceptance() {
        assert!(LoanStatus::New.accepts_top_up());
        assert!(LoanStatus::Active.accepts_top_up());
        assert!(!LoanStatus::Liquidating.accepts_top_up());
        assert!(!LoanStatus::Liquidated.accepts_top_up());
    }

    #[test]
    fn test_balances() {
        let now = Utc::now();
        let mut loan = Loan::new("L1", "B1", Decimal::from(1000), now);
        loan.collateral = Decimal::from(40);
        loan.collateral_sold = Decimal::from(20);
        loan.proceeds_gc = Decimal::from(1000);

        assert_eq!(loan.outstanding_balance(), Decimal::ZERO);
        assert_eq!(loan.remaining_collateral(), Decimal::from(20));

        loan.proceeds_gc = Decimal::from(800);
        assert_eq!(loan.outstanding_balance(), Decimal::from(200));
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&LoanStatus::Liquidating).unwrap();
        assert_eq!(json, "\"liquidating\"");
        let back: LoanStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(back, LoanStatus::Active);
    }
}
