//! Idempotency records keyed by the caller-supplied request id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of a processed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RequestOutcome {
    Accepted,
    Rejected { reason: String },
}

impl RequestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Record of an already-processed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRequest {
    pub request_id: String,
    pub outcome: RequestOutcome,
    pub at: DateTime<Utc>,
}
