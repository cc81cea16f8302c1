//! Lifecycle events published to the loan events topic.
//!
//! Event ids are deterministic per (loan, transition), so at-least-once
//! bus delivery stays de-duplicatable downstream: every retry of the
//! same transition carries the same id.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::money::format_amount;
use coruscant_store::LoanStatus;

/// One of the three lifecycle transitions consumers hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum LoanEvent {
    Application {
        loan_id: String,
        amount: Decimal,
    },
    Activation {
        loan_id: String,
        outstanding_balance: Decimal,
    },
    Liquidation {
        loan_id: String,
        collateral_sold: Decimal,
        collateral_value: Decimal,
        remaining_collateral: Decimal,
        outstanding_balance: Decimal,
    },
}

impl LoanEvent {
    pub fn loan_id(&self) -> &str {
        match self {
            Self::Application { loan_id, .. }
            | Self::Activation { loan_id, .. }
            | Self::Liquidation { loan_id, .. } => loan_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Application { .. } => "application",
            Self::Activation { .. } => "activation",
            Self::Liquidation { .. } => "liquidation",
        }
    }

    /// Loan status announced by this event.
    pub fn status(&self) -> LoanStatus {
        match self {
            Self::Application { .. } => LoanStatus::New,
            Self::Activation { .. } => LoanStatus::Active,
            Self::Liquidation { .. } => LoanStatus::Liquidated,
        }
    }

    /// Deterministic id: hash of loan id, announced status, and the
    /// transition's logical version.
    pub fn event_id(&self) -> String {
        let status = self.status();
        let mut hasher = Sha256::new();
        hasher.update(self.loan_id().as_bytes());
        hasher.update([0u8]);
        hasher.update(status.as_str().as_bytes());
        hasher.update([0u8, status.ordinal()]);
        hex::encode(hasher.finalize())
    }

    /// Wire payload; all amounts go out as decimal strings.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            Self::Application { loan_id, amount } => serde_json::json!({
                "eventId": self.event_id(),
                "eventType": "application",
                "loanId": loan_id,
                "amount": format_amount(*amount),
                "status": "new",
            }),
            Self::Activation {
                loan_id,
                outstanding_balance,
            } => serde_json::json!({
                "eventId": self.event_id(),
                "eventType": "activation",
                "loanId": loan_id,
                "status": "active",
                "outstandingBalance": format_amount(*outstanding_balance),
            }),
            Self::Liquidation {
                loan_id,
                collateral_sold,
                collateral_value,
                remaining_collateral,
                outstanding_balance,
            } => serde_json::json!({
                "eventId": self.event_id(),
                "eventType": "liquidation",
                "loanId": loan_id,
                "collateralSold": format_amount(*collateral_sold),
                "collateralValue": format_amount(*collateral_value),
                "remainingCollateral": format_amount(*remaining_collateral),
                "outstandingBalance": format_amount(*outstanding_balance),
                "status": "liquidated",
            }),
        }
    }
}
