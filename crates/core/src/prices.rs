//! Price aggregation (the per-venue book and the feed ingest tasks).
//!
//! One ingest task per venue consumes the bus topic, normalizes the wire
//! shape, and lands the tick in the book. The book answers freshness,
//! mid-price, and per-quantity effective sell price; each accepted tick
//! fans out to subscribers (the LTV evaluator).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use coruscant_api::{normalize_feed_message, BusConsumer, PriceTick, Venue};

/// Pause before resubscribing after the bus stream drops.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

pub struct PriceBook {
    ticks: DashMap<Venue, PriceTick>,
    malformed: DashMap<Venue, u64>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<Venue>>>,
    clock: Arc<dyn Clock>,
    max_tick_age: ChronoDuration,
}

impl PriceBook {
    pub fn new(clock: Arc<dyn Clock>, max_tick_age: Duration) -> Self {
        Self {
            ticks: DashMap::new(),
            malformed: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            clock,
            max_tick_age: ChronoDuration::from_std(max_tick_age)
                .unwrap_or_else(|_| ChronoDuration::seconds(30)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Land a normalized tick and notify subscribers.
    pub fn ingest(&self, tick: PriceTick) {
        let venue = tick.venue;
        debug!(%venue, source_ts = %tick.source_timestamp, "tick accepted");
        self.ticks.insert(venue, tick);
        self.listeners
            .lock()
            .retain(|listener| listener.send(venue).is_ok());
    }

    /// Tick update notifications, one venue marker per accepted tick.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Venue> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    pub fn record_malformed(&self, venue: Venue) {
        *self.malformed.entry(venue).or_insert(0) += 1;
    }

    pub fn malformed_count(&self, venue: Venue) -> u64 {
        self.malformed.get(&venue).map(|c| *c).unwrap_or(0)
    }

    /// Last tick for the venue, if still fresh.
    pub fn latest(&self, venue: Venue) -> Option<PriceTick> {
        let tick = self.ticks.get(&venue)?;
        if tick.age(self.clock.now()) <= self.max_tick_age {
            Some(tick.value().clone())
        } else {
            None
        }
    }

    /// Mean of the per-venue mids at quantity 1 across fresh venues.
    pub fn mid_price(&self) -> Option<Decimal> {
        let mids: Vec<Decimal> = Venue::ALL
            .iter()
            .filter_map(|venue| self.latest(*venue)?.mid())
            .collect();
        if mids.is_empty() {
            return None;
        }
        let sum: Decimal = mids.iter().sum();
        Some(sum / Decimal::from(mids.len() as u64))
    }

    /// Sell price at the venue for the smallest tier covering `qty`;
    /// stale venues answer nothing.
    pub fn effective_sell_price(&self, venue: Venue, qty: u64) -> Option<Decimal> {
        self.latest(venue)?.sell_for_quantity(qty)
    }

    /// Venue with the better sell price for a lot of `qty`. Ties keep
    /// Mos Espa (first in venue order); a lone fresh venue wins outright.
    pub fn best_venue_for(&self, qty: u64) -> Option<(Venue, Decimal)> {
        let mut best: Option<(Venue, Decimal)> = None;
        for venue in Venue::ALL {
            if let Some(price) = self.effective_sell_price(venue, qty) {
                let better = match best {
                    Some((_, best_price)) => price > best_price,
                    None => true,
                };
                if better {
                    best = Some((venue, price));
                }
            }
        }
        best
    }
}

/// Consume one venue's price topic forever, resubscribing on stream loss.
pub async fn run_feed_ingest(
    book: Arc<PriceBook>,
    bus: Arc<dyn BusConsumer>,
    venue: Venue,
    topic: String,
) {
    loop {
        let mut stream = match bus.subscribe(&topic).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%venue, %topic, error = %e, "feed subscription failed");
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
        };
        info!(%venue, %topic, "feed subscription active");

        while let Some(message) = stream.recv().await {
            match normalize_feed_message(venue, &message, book.now()) {
                Ok(Some(tick)) => book.ingest(tick),
                Ok(None) => {} // valid message for another item
                Err(e) => {
                    book.record_malformed(venue);
                    warn!(%venue, error = %e, "malformed feed message dropped");
                }
            }
        }

        warn!(%venue, %topic, "feed stream ended, resubscribing");
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}
