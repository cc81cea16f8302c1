//! Price feed normalization.
//!
//! The two venues publish very different wire shapes; both collapse into
//! the uniform [`PriceTick`]. A tick is all-or-nothing: a missing tier or
//! an unparsable price discards the whole message.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::tick::{PriceTick, TierQuote, TIERS};
use crate::venue::Venue;

/// Black Spire quotes many items on one stream; only this one is ours.
const BLACK_SPIRE_COLLATERAL_ITEM: &str = "BSK";

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("malformed feed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("bad source timestamp: {0}")]
    BadTimestamp(String),

    #[error("bad price {value:?} at tier {tier}")]
    BadPrice { tier: u64, value: String },

    #[error("ladder missing tier {0}")]
    MissingTier(u64),
}

/// Mos Espa wire shape: RFC 3339 timestamp, flat ladder with decimal
/// string prices.
#[derive(Debug, Deserialize)]
struct MosEspaMessage {
    timestamp: String,
    ladder: Vec<MosEspaLadderEntry>,
}

#[derive(Debug, Deserialize)]
struct MosEspaLadderEntry {
    quantity: u64,
    buy: String,
    sell: String,
}

/// Black Spire wire shape: unix-seconds time, per-side depth arrays,
/// numeric prices, multiple items multiplexed on one stream.
#[derive(Debug, Deserialize)]
struct BlackSpireMessage {
    item: String,
    time: i64,
    buy: Vec<BlackSpireLevel>,
    sell: Vec<BlackSpireLevel>,
}

#[derive(Debug, Deserialize)]
struct BlackSpireLevel {
    amount: u64,
    price: serde_json::Number,
}

/// Normalize one raw bus message from the given venue's feed.
///
/// Returns `Ok(None)` for messages that are valid but not ours (Black
/// Spire items other than BSK are dropped silently).
pub fn normalize_feed_message(
    venue: Venue,
    payload: &serde_json::Value,
    received_at: DateTime<Utc>,
) -> Result<Option<PriceTick>, FeedError> {
    match venue {
        Venue::MosEspa => normalize_mos_espa(payload, received_at).map(Some),
        Venue::BlackSpire => normalize_black_spire(payload, received_at),
    }
}

fn normalize_mos_espa(
    payload: &serde_json::Value,
    received_at: DateTime<Utc>,
) -> Result<PriceTick, FeedError> {
    let msg: MosEspaMessage = serde_json::from_value(payload.clone())?;

    let source_timestamp = DateTime::parse_from_rfc3339(&msg.timestamp)
        .map_err(|e| FeedError::BadTimestamp(format!("{}: {e}", msg.timestamp)))?
        .with_timezone(&Utc);

    let mut tiers = BTreeMap::new();
    for entry in &msg.ladder {
        if !TIERS.contains(&entry.quantity) {
            continue;
        }
        tiers.insert(
            entry.quantity,
            TierQuote {
                buy: parse_price(&entry.buy, entry.quantity)?,
                sell: parse_price(&entry.sell, entry.quantity)?,
            },
        );
    }
    ensure_complete(&tiers)?;

    Ok(PriceTick {
        venue: Venue::MosEspa,
        received_at,
        source_timestamp,
        tiers,
    })
}

fn normalize_black_spire(
    payload: &serde_json::Value,
    received_at: DateTime<Utc>,
) -> Result<Option<PriceTick>, FeedError> {
    let msg: BlackSpireMessage = serde_json::from_value(payload.clone())?;

    if msg.item != BLACK_SPIRE_COLLATERAL_ITEM {
        return Ok(None);
    }

    let source_timestamp = DateTime::from_timestamp(msg.time, 0)
        .ok_or_else(|| FeedError::BadTimestamp(msg.time.to_string()))?;

    let mut tiers = BTreeMap::new();
    for tier in TIERS {
        let buy = side_price(&msg.buy, tier)?.ok_or(FeedError::MissingTier(tier))?;
        let sell = side_price(&msg.sell, tier)?.ok_or(FeedError::MissingTier(tier))?;
        tiers.insert(tier, TierQuote { buy, sell });
    }

    Ok(Some(PriceTick {
        venue: Venue::BlackSpire,
        received_at,
        source_timestamp,
        tiers,
    }))
}

fn side_price(levels: &[BlackSpireLevel], tier: u64) -> Result<Option<Decimal>, FeedError> {
    levels
        .iter()
        .find(|l| l.amount == tier)
        .map(|l| parse_price(&l.price.to_string(), tier))
        .transpose()
}

fn parse_price(raw: &str, tier: u64) -> Result<Decimal, FeedError> {
    let price = Decimal::from_str(raw).map_err(|_| FeedError::BadPrice {
        tier,
        value: raw.to_string(),
    })?;
    if price <= Decimal::ZERO {
        return Err(FeedError::BadPrice {
            tier,
            value: raw.to_string(),
        });
    }
    Ok(price)
}

fn ensure_complete(tiers: &BTreeMap<u64, TierQuote>) -> Result<(), FeedError> {
    for tier in TIERS {
        if !tiers.contains_key(&tier) {
            return Err(FeedError::MissingTier(tier));
        }
    }
    Ok(())
}
