//! Order sizing against the fixed venue tiers.
//!
//! Venues only quote {1, 10, 50, 100}; anything bigger executes as a
//! sequence of tier-sized lots. Decomposition is greedy and exact, so a
//! 20-BSK requirement becomes two 10 lots rather than one oversized 50.

use rust_decimal::Decimal;
use smallvec::SmallVec;

use crate::money::ceil_to_u64;
use coruscant_api::TIERS;

/// BSK needed to cover `amount_gc` at mid-price `mid`, rounded up to a
/// whole unit.
pub fn required_quantity(amount_gc: Decimal, mid: Decimal) -> u64 {
    if mid <= Decimal::ZERO {
        return 0;
    }
    ceil_to_u64(amount_gc / mid)
}

/// Largest tier not exceeding `target`: the next lot to put on the wire.
pub fn next_lot(target: u64) -> Option<u64> {
    TIERS.iter().rev().find(|tier| **tier <= target).copied()
}

/// Full greedy decomposition of `quantity` into tier lots.
pub fn plan_lots(quantity: u64) -> SmallVec<[u64; 8]> {
    let mut lots = SmallVec::new();
    let mut remaining = quantity;
    while remaining > 0 {
        match next_lot(remaining) {
            Some(lot) => {
                lots.push(lot);
                remaining -= lot;
            }
            None => break,
        }
    }
    lots
}
