//! 18-decimal fixed-point helpers for market event values.
//!
//! Event fields arrive as WAD-scaled `U256`/`I256`. Products are taken in
//! U256 before being reduced to [`Decimal`] so no precision is lost in the
//! intermediate step.

use alloy::primitives::{I256, U256};
use rust_decimal::Decimal;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Number of decimals in a WAD value.
pub const WAD_DECIMALS: u32 = 18;

/// Largest mantissa a `Decimal` can hold (2^96 - 1).
const MAX_MANTISSA: U256 = U256::from_limbs([u64::MAX, u32::MAX as u64, 0, 0]);

/// Convert an unsigned WAD value to a `Decimal`.
///
/// Digits beyond the 96-bit mantissa are truncated. Values too large for
/// `Decimal` even at scale 0 saturate to `Decimal::MAX`.
pub fn wad_to_decimal(value: U256) -> Decimal {
    let (mantissa, scale) = reduce(value, WAD_DECIMALS);
    match mantissa {
        Some(m) => Decimal::from_i128_with_scale(m as i128, scale).normalize(),
        None => Decimal::MAX,
    }
}

/// Convert a signed WAD value to a `Decimal`.
pub fn signed_wad_to_decimal(value: I256) -> Decimal {
    let magnitude = wad_to_decimal(value.unsigned_abs());
    if value.is_negative() {
        -magnitude
    } else {
        magnitude
    }
}

/// Drop trailing digits until the value fits a `Decimal` mantissa.
fn reduce(mut value: U256, mut scale: u32) -> (Option<u128>, u32) {
    let ten = U256::from(10u64);
    while value > MAX_MANTISSA && scale > 0 {
        value /= ten;
        scale -= 1;
    }
    if value > MAX_MANTISSA {
        (None, scale)
    } else {
        (Some(value.to::<u128>()), scale)
    }
}

/// Leverage of a position: `|size| * last_price / margin`.
///
/// Returns `None` for zero margin.
pub fn leverage(size: I256, last_price: U256, margin: U256) -> Option<Decimal> {
    if margin.is_zero() {
        return None;
    }
    let wad = match size.unsigned_abs().checked_mul(last_price) {
        Some(product) => product / margin,
        None => return Some(Decimal::MAX),
    };
    Some(wad_to_decimal(wad))
}

/// USD notional of a trade: `|trade_size| * last_price / 1e18`.
pub fn notional(trade_size: I256, last_price: U256) -> Decimal {
    match trade_size.unsigned_abs().checked_mul(last_price) {
        Some(product) => wad_to_decimal(product / WAD),
        None => Decimal::MAX,
    }
}

/// Convert a whole number of units to WAD.
#[inline(always)]
pub fn units(n: u64) -> U256 {
    U256::from(n) * WAD
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn signed_units(n: i64) -> I256 {
        let magnitude = I256::from_raw(units(n.unsigned_abs()));
        if n < 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    #[test]
    fn test_wad_to_decimal() {
        assert_eq!(wad_to_decimal(units(10)), Decimal::from(10));
        assert_eq!(wad_to_decimal(U256::ZERO), Decimal::ZERO);
        assert_eq!(
            wad_to_decimal(U256::from(1_500_000_000_000_000_000u128)),
            Decimal::from_str("1.5").unwrap()
        );
        // one wei
        assert_eq!(
            wad_to_decimal(U256::from(1u64)),
            Decimal::from_str("0.000000000000000001").unwrap()
        );
    }

    #[test]
    fn test_signed_wad_to_decimal() {
        assert_eq!(signed_wad_to_decimal(signed_units(-7)), Decimal::from(-7));
        assert_eq!(signed_wad_to_decimal(signed_units(3)), Decimal::from(3));
    }

    #[test]
    fn test_large_values_truncate_fraction() {
        // 1e12 units does not fit 96 bits at scale 18
        let value = units(1_000_000_000_000) + U256::from(1u64);
        assert_eq!(wad_to_decimal(value), Decimal::from(1_000_000_000_000u64));
        assert_eq!(wad_to_decimal(U256::MAX), Decimal::MAX);
    }

    #[test]
    fn test_leverage() {
        // size 10, price 2, margin 1 => 20x
        let lev = leverage(signed_units(10), units(2), units(1)).unwrap();
        assert_eq!(lev, Decimal::from(20));

        // short positions use |size|
        let lev = leverage(signed_units(-10), units(2), units(4)).unwrap();
        assert_eq!(lev, Decimal::from(5));

        assert!(leverage(signed_units(10), units(2), U256::ZERO).is_none());
    }

    #[test]
    fn test_notional() {
        assert_eq!(notional(signed_units(-3), units(2)), Decimal::from(6));
        assert_eq!(notional(I256::ZERO, units(2)), Decimal::ZERO);
    }
}
