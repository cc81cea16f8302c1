//! Decimal helpers for GC and BSK amounts.
//!
//! All money flows through `rust_decimal`; floats never touch balances
//! or prices.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Slack for LTV threshold comparisons, avoiding chatter at the exact
/// boundary.
pub fn ltv_epsilon() -> Decimal {
    Decimal::new(1, 6) // 1e-6
}

/// Parse a wire amount. Callers layer their own positivity rules on top.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok()
}

/// Canonical wire form: trailing zeros trimmed, so `20.00` goes out as
/// `"20"`.
pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Smallest integer quantity covering `amount` (ceiling), clamped to
/// zero for non-positive inputs.
pub fn ceil_to_u64(amount: Decimal) -> u64 {
    if amount <= Decimal::ZERO {
        return 0;
    }
    amount.ceil().to_u64().unwrap_or(u64::MAX)
}

/// Whole units contained in `amount` (floor), clamped to zero.
pub fn floor_to_u64(amount: Decimal) -> u64 {
    if amount <= Decimal::ZERO {
        return 0;
    }
    amount.floor().to_u64().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000").unwrap(), Decimal::from(1000));
        assert_eq!(
            parse_amount(" 49.12345678 ").unwrap(),
            Decimal::from_str("49.12345678").unwrap()
        );
        assert!(parse_amount("ten credits").is_none());
        assert!(parse_amount("").is_none());
    }

    #[test]
    fn test_format_trims_trailing_zeros() {
        assert_eq!(format_amount(Decimal::from_str("20.00").unwrap()), "20");
        assert_eq!(format_amount(Decimal::from_str("0.50").unwrap()), "0.5");
        assert_eq!(format_amount(Decimal::ZERO), "0");
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(ceil_to_u64(Decimal::from_str("19.01").unwrap()), 20);
        assert_eq!(ceil_to_u64(Decimal::from(20)), 20);
        assert_eq!(ceil_to_u64(Decimal::from(-3)), 0);
        assert_eq!(floor_to_u64(Decimal::from_str("40.9").unwrap()), 40);
        assert_eq!(floor_to_u64(Decimal::from_str("0.9").unwrap()), 0);
    }
}
