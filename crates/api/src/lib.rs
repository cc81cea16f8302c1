//! External wire surface for the Coruscant loan liquidation service.
//!
//! This crate talks to everything outside the process boundary:
//! - The two trading venues (Mos Espa, Black Spire Outpost) for sell orders
//! - The message bus (publish lifecycle events, consume price feeds)
//! - Normalization of the two heterogeneous price-feed wire shapes into
//!   the uniform [`PriceTick`]
//!
//! Venue and bus access sit behind traits so the core can be exercised
//! against scripted doubles.

mod black_spire;
mod bus;
mod feed;
mod mos_espa;
mod tick;
mod trade;
mod venue;

pub use black_spire::BlackSpireClient;
pub use bus::{BusConsumer, BusError, BusPublisher, HttpBusClient, MemoryBus};
pub use feed::{normalize_feed_message, FeedError};
pub use mos_espa::MosEspaClient;
pub use tick::{PriceTick, TierQuote, TIERS};
pub use trade::{VenueClient, VenueError, VenueFill};
pub use venue::Venue;
