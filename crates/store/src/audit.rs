//! Append-only audit log entries.
//!
//! Every state-changing operation leaves a record here, including each
//! trade attempt with its outbound correlation id. The log is a durability
//! contract, not a query surface.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub loan_id: String,
    #[serde(flatten)]
    pub kind: AuditKind,
}

impl AuditEntry {
    pub fn new(loan_id: impl Into<String>, at: DateTime<Utc>, kind: AuditKind) -> Self {
        Self {
            at,
            loan_id: loan_id.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditKind {
    ApplicationAccepted {
        request_id: String,
        principal: Decimal,
    },
    CollateralTopUp {
        request_id: String,
        amount: Decimal,
    },
    Activated,
    /// LTV breach decided; the loan moved to `liquidating`.
    LiquidationScheduled,
    /// A worker acquired the lease and began selling.
    LiquidationStarted {
        worker: String,
    },
    TradeAttempt {
        venue: String,
        client_order_id: String,
        quantity: u64,
    },
    TradeFilled {
        venue: String,
        client_order_id: String,
        quantity: u64,
        proceeds_gc: Decimal,
    },
    TradeFailed {
        venue: String,
        client_order_id: String,
        reason: String,
    },
    Liquidated {
        collateral_sold: Decimal,
        proceeds_gc: Decimal,
    },
    /// A bus publish exhausted its retries; delivery is unknown.
    EventEmissionUncertain {
        event_id: String,
    },
}
