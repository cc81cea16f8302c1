//! Venue order placement seam.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::venue::Venue;

/// A filled sell order, normalized across venues.
#[derive(Debug, Clone)]
pub struct VenueFill {
    pub venue: Venue,
    /// Venue-assigned order id
    pub order_id: String,
    /// BSK sold
    pub quantity: u64,
    /// Total GC realized
    pub proceeds_gc: Decimal,
}

/// Venue-side failures. The liquidation engine treats every variant as
/// retryable; the split exists for logging and audit, not for policy.
#[derive(Debug, thiserror::Error)]
pub enum VenueError {
    /// Logical rejection: a well-formed request the venue declined,
    /// including the HTTP-200 failure bodies both venues produce.
    #[error("{venue} rejected order {client_order_id}: {reason}")]
    Rejected {
        venue: Venue,
        client_order_id: String,
        reason: String,
    },

    #[error("{venue} returned HTTP {status}")]
    Http { venue: Venue, status: u16 },

    #[error("{venue} transport failure: {source}")]
    Transport {
        venue: Venue,
        #[source]
        source: reqwest::Error,
    },

    #[error("{venue} returned a malformed response: {detail}")]
    Malformed { venue: Venue, detail: String },
}

impl VenueError {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// A market the engine can sell collateral on.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> Venue;

    /// Place a market sell for `quantity` BSK.
    ///
    /// Callers must supply a fresh `client_order_id` per attempt so the
    /// venue never de-duplicates a retry against a failed original.
    async fn sell(&self, client_order_id: &str, quantity: u64) -> Result<VenueFill, VenueError>;
}
