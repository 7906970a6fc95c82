//! Conversions between human-readable token amounts and raw on-chain integers.
//!
//! Human amounts are decimal strings such as `"1.5"`; raw amounts are `U256` values in
//! the token's smallest unit. Conversion is done on the digit string rather than through
//! a fixed-precision type so 18-decimal tokens never lose precision.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::ServiceResult;
use super::error::ServiceError;

const BPS_DENOMINATOR: u64 = 10_000;

/// Parse a human amount and require it to be strictly positive.
pub fn parse_positive_decimal(amount: &str) -> Result<Decimal, String> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err("amount is empty".to_string());
    }
    if !trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(format!("'{trimmed}' is not a plain decimal number"));
    }

    let value = Decimal::from_str(trimmed).map_err(|e| format!("'{trimmed}': {e}"))?;
    if value <= Decimal::ZERO {
        return Err(format!("'{trimmed}' must be greater than zero"));
    }

    Ok(value)
}

/// Convert a human amount (e.g. "1.5") to raw units: `amount × 10^decimals`.
///
/// Fractional digits beyond `decimals` are truncated.
///
/// # Examples
/// - "1" with 18 decimals -> 1000000000000000000
/// - "100.5" with 6 decimals -> 100500000
pub fn to_raw_amount(amount: &str, decimals: u8) -> ServiceResult<U256> {
    parse_positive_decimal(amount).map_err(ServiceError::InvalidAmount)?;

    let trimmed = amount.trim();
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));

    let width = decimals as usize;
    let mut digits = String::with_capacity(whole.len() + width);
    digits.push_str(if whole.is_empty() { "0" } else { whole });
    digits.extend(fraction.chars().take(width));
    for _ in fraction.len().min(width)..width {
        digits.push('0');
    }

    let raw = U256::from_str_radix(&digits, 10)
        .map_err(|e| ServiceError::InvalidAmount(format!("'{trimmed}' out of range: {e}")))?;

    if raw.is_zero() {
        return Err(ServiceError::InvalidAmount(format!(
            "'{trimmed}' is below the smallest unit of a {decimals}-decimal token"
        )));
    }

    Ok(raw)
}

/// Format balance from smallest unit to human-readable format
///
/// # Arguments
/// * `balance` - Balance in smallest unit (e.g., wei for ETH)
/// * `decimals` - Number of decimal places for the token
///
/// # Returns
/// Formatted balance as string with trailing zeros removed
pub fn format_balance(balance: U256, decimals: u8) -> String {
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = balance / divisor;
    let remainder = balance % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let decimal_part = remainder.to_string();
        let padded = format!("{:0>width$}", decimal_part, width = decimals as usize);
        let trimmed = padded.trim_end_matches('0');
        if trimmed.is_empty() {
            whole.to_string()
        } else {
            format!("{whole}.{trimmed}")
        }
    }
}

/// `floor(value × (10000 + bps) / 10000)`, used for slippage and gas headroom.
pub fn add_bps(value: U256, bps: u32) -> U256 {
    value.saturating_mul(U256::from(BPS_DENOMINATOR + bps as u64)) / U256::from(BPS_DENOMINATOR)
}

/// `floor(value × (10000 − bps) / 10000)`, the minimum accepted after slippage.
pub fn sub_bps(value: U256, bps: u32) -> U256 {
    let keep = BPS_DENOMINATOR.saturating_sub(bps as u64);
    value.saturating_mul(U256::from(keep)) / U256::from(BPS_DENOMINATOR)
}
