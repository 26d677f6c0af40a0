/*
 * Amount parsing, base-unit conversion and slippage helpers
 */

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use crate::models::{Result, SwapError, BPS_DENOMINATOR};

// rust_decimal keeps a 96-bit mantissa and at most 28 fractional digits.
const MAX_DECIMAL_SCALE: u32 = 28;

/// Parses a human-readable amount typed by the user.
///
/// Returns `Ok(None)` for an empty or zero amount, which callers treat as
/// "no trade". Signs, exponents, separators and more fractional digits than
/// `decimals` (ignoring trailing zeros) are rejected.
pub fn parse_amount(input: &str, decimals: u8) -> Result<Option<Decimal>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let (integer, fraction) = match trimmed.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (trimmed, ""),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (integer.is_empty() && fraction.is_empty()) || !all_digits(integer) || !all_digits(fraction) {
        return Err(SwapError::InvalidAmount(format!("not a number: {trimmed}")));
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > usize::from(decimals) {
        return Err(SwapError::InvalidAmount(format!(
            "{trimmed} has more than {decimals} fractional digits"
        )));
    }
    if fraction.len() > MAX_DECIMAL_SCALE as usize {
        return Err(SwapError::InvalidAmount(format!(
            "{trimmed} exceeds supported precision"
        )));
    }

    let integer = if integer.is_empty() { "0" } else { integer };
    let canonical = if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{integer}.{fraction}")
    };
    let value = Decimal::from_str(&canonical)
        .map_err(|e| SwapError::InvalidAmount(format!("{trimmed}: {e}")))?;
    // from_str rounds away digits beyond the 96-bit mantissa instead of failing.
    if value.scale() as usize != fraction.len() {
        return Err(SwapError::InvalidAmount(format!(
            "{trimmed} exceeds supported precision"
        )));
    }

    if value.is_zero() {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

/// Converts a human amount to base units (`amount * 10^decimals`) without rounding.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256> {
    if amount.is_sign_negative() {
        return Err(SwapError::InvalidAmount(format!("negative amount: {amount}")));
    }
    let normalized = amount.normalize();
    let scale = normalized.scale();
    if scale > u32::from(decimals) {
        return Err(SwapError::InvalidAmount(format!(
            "{amount} has more than {decimals} fractional digits"
        )));
    }

    let mantissa = BigUint::from(normalized.mantissa().unsigned_abs());
    let factor = BigUint::from(10u8).pow(u32::from(decimals) - scale);
    biguint_to_u256(&(mantissa * factor))
}

/// Converts base units to a human amount. Digits that do not fit the decimal
/// representation are truncated, so the result never exceeds the true value.
pub fn from_base_units(value: U256, decimals: u8) -> Result<Decimal> {
    let mut digits = u256_to_biguint(value);
    let mut scale = u32::from(decimals);
    let limit = BigUint::from(1u128 << 96);

    while scale > MAX_DECIMAL_SCALE || digits >= limit {
        if scale == 0 {
            return Err(SwapError::InvalidAmount(format!(
                "{value} base units exceed decimal range"
            )));
        }
        digits /= 10u32;
        scale -= 1;
    }

    let mantissa = digits
        .to_i128()
        .ok_or_else(|| SwapError::InvalidAmount(format!("{value} base units out of range")))?;
    let amount = Decimal::try_from_i128_with_scale(mantissa, scale)
        .map_err(|e| SwapError::InvalidAmount(format!("{value} base units: {e}")))?;
    Ok(amount.normalize())
}

/// `amount * (10000 - bps) / 10000`, rounded down.
#[must_use]
pub fn apply_slippage(amount: U256, slippage_bps: u16) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let keep = denominator.saturating_sub(U256::from(slippage_bps));
    match amount.checked_mul(keep) {
        Some(scaled) => scaled / denominator,
        None => amount / denominator * keep,
    }
}

#[must_use]
pub fn deadline_from(now: DateTime<Utc>, deadline_minutes: u32) -> U256 {
    let seconds = now.timestamp().max(0).unsigned_abs() + u64::from(deadline_minutes) * 60;
    U256::from(seconds)
}

pub fn parse_address(address: &str) -> Result<Address> {
    if !address.starts_with("0x") || address.len() != 42 {
        return Err(SwapError::ConfigError(format!("Invalid address format: {address}")));
    }
    Address::from_str(address)
        .map_err(|e| SwapError::ConfigError(format!("Invalid address {address}: {e}")))
}

fn biguint_to_u256(value: &BigUint) -> Result<U256> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return Err(SwapError::InvalidAmount("amount overflows 256 bits".to_string()));
    }
    Ok(U256::from_big_endian(&bytes))
}

fn u256_to_biguint(value: U256) -> BigUint {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigUint::from_bytes_be(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn parse_amount_accepts_plain_decimals() {
        assert_eq!(parse_amount("1.5", 18).unwrap(), Some(dec("1.5")));
        assert_eq!(parse_amount(" 42 ", 6).unwrap(), Some(dec("42")));
        assert_eq!(parse_amount(".25", 6).unwrap(), Some(dec("0.25")));
        assert_eq!(parse_amount("3.", 6).unwrap(), Some(dec("3")));
        assert_eq!(parse_amount("1.500000000", 6).unwrap(), Some(dec("1.5")));
    }

    #[test]
    fn parse_amount_treats_empty_and_zero_as_no_trade() {
        assert_eq!(parse_amount("", 18).unwrap(), None);
        assert_eq!(parse_amount("0", 18).unwrap(), None);
        assert_eq!(parse_amount("0.000", 18).unwrap(), None);
    }

    #[test]
    fn parse_amount_rejects_garbage_and_excess_precision() {
        for input in ["abc", "-1", "1e5", "1.2.3", ".", "+3", "1,5", "NaN"] {
            assert!(
                matches!(parse_amount(input, 18), Err(SwapError::InvalidAmount(_))),
                "{input} should be rejected"
            );
        }
        assert!(matches!(parse_amount("1.0000001", 6), Err(SwapError::InvalidAmount(_))));
        assert!(matches!(parse_amount("1.5", 0), Err(SwapError::InvalidAmount(_))));
        assert!(matches!(
            parse_amount("123456789012.123456789012345678", 18),
            Err(SwapError::InvalidAmount(_))
        ));
        assert_eq!(
            parse_amount("1234567890.123456789012345678", 18).unwrap(),
            Some(dec("1234567890.123456789012345678"))
        );
    }

    #[test]
    fn base_unit_conversion_is_exact() {
        assert_eq!(
            to_base_units(dec("1.5"), 18).unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert_eq!(to_base_units(dec("2000.0"), 6).unwrap(), U256::from(2_000_000_000u64));
        assert_eq!(to_base_units(dec("0.000001"), 6).unwrap(), U256::one());
        assert!(to_base_units(dec("0.0000001"), 6).is_err());
        assert!(to_base_units(dec("-1"), 6).is_err());
    }

    #[test]
    fn from_base_units_truncates_only_unrepresentable_digits() {
        assert_eq!(from_base_units(U256::from(1_990_000_000u64), 6).unwrap(), dec("1990"));
        assert_eq!(from_base_units(U256::one(), 18).unwrap(), dec("0.000000000000000001"));
        // 40 decimals: the last 12 digits fall outside the decimal scale.
        assert_eq!(from_base_units(U256::exp10(40), 40).unwrap(), dec("1"));
        assert!(from_base_units(U256::MAX, 0).is_err());
    }

    #[test]
    fn slippage_rounds_down() {
        assert_eq!(apply_slippage(U256::from(2_000_000_000u64), 50), U256::from(1_990_000_000u64));
        assert_eq!(apply_slippage(U256::from(999u64), 1), U256::from(998u64));
        assert_eq!(apply_slippage(U256::from(1000u64), 0), U256::from(1000u64));
        assert_eq!(apply_slippage(U256::MAX, 5000), U256::MAX / 10_000 * 5_000);
    }

    #[test]
    fn deadline_adds_minutes() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(deadline_from(now, 20), U256::from(1_700_001_200u64));
    }

    #[test]
    fn parse_address_checks_format() {
        assert!(parse_address("0x92e9cc05b7935a4bea5669546e3f49df0c9853be").is_ok());
        assert!(parse_address("92e9cc05b7935a4bea5669546e3f49df0c9853be").is_err());
        assert!(parse_address("0x1234").is_err());
    }
}
