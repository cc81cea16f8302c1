//! Coruscant Bank core lending logic.
//!
//! This crate provides the loan liquidation service's domain machinery:
//! - Price aggregation over the two venue feeds
//! - The loan lifecycle engine (applications, top-ups, idempotency)
//! - The LTV evaluator driving activation and liquidation decisions
//! - The liquidation engine (queue, worker pool, recovery paths)
//! - Lifecycle event publication with deterministic event ids

pub mod backoff;
mod clock;
pub mod config;
mod engine;
mod error;
mod evaluator;
mod events;
mod lifecycle;
mod locks;
pub mod money;
mod prices;
mod publisher;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use engine::{
    next_lot, plan_lots, required_quantity, LiquidationQueue, LiquidationRunner, VenueClients,
};
pub use error::LendingError;
pub use evaluator::{ltv, LtvEvaluator};
pub use events::LoanEvent;
pub use lifecycle::{LifecycleEngine, SubmissionReceipt};
pub use locks::KeyedLocks;
pub use prices::{run_feed_ingest, PriceBook};
pub use publisher::{publish_with_audit, EventPublisher, PublishError};
