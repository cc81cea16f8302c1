//! The uniform price tick both feeds normalize into.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::venue::Venue;

/// The fixed quantities venues quote at.
pub const TIERS: [u64; 4] = [1, 10, 50, 100];

/// Buy/sell quote for one tier, GC per BSK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierQuote {
    pub buy: Decimal,
    pub sell: Decimal,
}

/// Per-venue price snapshot with the full four-tier ladder.
///
/// Construction goes through [`crate::normalize_feed_message`], which
/// guarantees the ladder is complete; lookups here never miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub venue: Venue,
    /// When this process received the message
    pub received_at: DateTime<Utc>,
    /// Timestamp claimed by the feed itself
    pub source_timestamp: DateTime<Utc>,
    /// Tier quantity → quote, keyed in ascending order
    pub tiers: BTreeMap<u64, TierQuote>,
}

impl PriceTick {
    pub fn quote(&self, tier: u64) -> Option<TierQuote> {
        self.tiers.get(&tier).copied()
    }

    /// Sell price for the smallest tier covering `qty`; quantities above
    /// the top tier fall back to the 100 tier as the worst-case
    /// approximation.
    pub fn sell_for_quantity(&self, qty: u64) -> Option<Decimal> {
        let tier = TIERS.iter().find(|t| **t >= qty).copied().unwrap_or(100);
        self.quote(tier).map(|q| q.sell)
    }

    /// Venue mid: mean of the best buy and sell quotes at quantity 1.
    pub fn mid(&self) -> Option<Decimal> {
        let best = self.quote(1)?;
        Some((best.buy + best.sell) / Decimal::TWO)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.received_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick_with_sell(venue: Venue, sell_1: &str) -> PriceTick {
        let sell: Decimal = sell_1.parse().unwrap();
        let mut tiers = BTreeMap::new();
        for (i, tier) in TIERS.iter().enumerate() {
            tiers.insert(
                *tier,
                TierQuote {
                    buy: sell - Decimal::new(i as i64 + 1, 1),
                    sell: sell - Decimal::new(i as i64, 1),
                },
            );
        }
        PriceTick {
            venue,
            received_at: Utc::now(),
            source_timestamp: Utc::now(),
            tiers,
        }
    }

    #[test]
    fn test_sell_for_quantity_picks_covering_tier() {
        let tick = tick_with_sell(Venue::MosEspa, "50");
        // Tier sells: 1 -> 50.0, 10 -> 49.9, 50 -> 49.8, 100 -> 49.7
        assert_eq!(tick.sell_for_quantity(1).unwrap(), "50".parse::<Decimal>().unwrap());
        assert_eq!(tick.sell_for_quantity(7).unwrap(), "49.9".parse::<Decimal>().unwrap());
        assert_eq!(tick.sell_for_quantity(10).unwrap(), "49.9".parse::<Decimal>().unwrap());
        assert_eq!(tick.sell_for_quantity(11).unwrap(), "49.8".parse::<Decimal>().unwrap());
        assert_eq!(tick.sell_for_quantity(100).unwrap(), "49.7".parse::<Decimal>().unwrap());
        // Above the top tier, the 100 tier stands in
        assert_eq!(tick.sell_for_quantity(250).unwrap(), "49.7".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_mid_is_mean_of_best_quotes() {
        let tick = tick_with_sell(Venue::BlackSpire, "50");
        // buy_1 = 49.9, sell_1 = 50.0
        assert_eq!(tick.mid().unwrap(), "49.95".parse::<Decimal>().unwrap());
    }
}
