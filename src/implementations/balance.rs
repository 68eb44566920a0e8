use std::str::FromStr;

use ethers::{types::U256, utils::parse_units};
use rust_decimal::{Decimal, RoundingStrategy};

/// Native currency and reward token both use 18 decimals.
pub const DECIMALS: u32 = 18;
pub const NATIVE_DISPLAY_DP: u32 = 4;
pub const TOKEN_DISPLAY_DP: u32 = 2;

/// Format a `U256` amount into a decimal string using the provided number of decimals.
pub fn format_with_decimals(raw: &U256, decimals: u32) -> String {
    if decimals == 0 {
        return raw.to_string();
    }

    let power = U256::exp10(decimals as usize);
    let integer = raw / power;
    let fraction = raw % power;

    if fraction.is_zero() {
        return integer.to_string();
    }

    let fraction_str = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    let trimmed_fraction = fraction_str.trim_end_matches('0');
    format!("{integer}.{trimmed_fraction}")
}

/// Render an amount with exactly `dp` fractional digits, rounding half away from zero.
///
/// Amounts too large for `Decimal` fall back to truncation on the string form.
pub fn format_fixed(raw: &U256, decimals: u32, dp: u32) -> String {
    let exact = format_with_decimals(raw, decimals);
    match Decimal::from_str(&exact) {
        Ok(value) => {
            let rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
            format!("{rounded:.prec$}", prec = dp as usize)
        }
        Err(_) => truncate_fixed(&exact, dp),
    }
}

fn truncate_fixed(exact: &str, dp: u32) -> String {
    let (integer, fraction) = exact.split_once('.').unwrap_or((exact, ""));
    if dp == 0 {
        return integer.to_string();
    }
    let mut fraction: String = fraction.chars().take(dp as usize).collect();
    while fraction.len() < dp as usize {
        fraction.push('0');
    }
    format!("{integer}.{fraction}")
}

/// Why a stake input was refused before reaching the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    Empty,
    NotANumber,
    NotPositive,
    TooPrecise,
    BelowMinimum,
}

/// Parse a user-typed amount of native currency into wei.
///
/// Rejects empty, non-numeric, zero and negative input, anything with more than
/// 18 fractional digits, and anything under `min_wei`.
pub fn parse_stake_amount(input: &str, min_wei: U256) -> Result<U256, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    if !is_plain_decimal(trimmed) {
        return Err(AmountError::NotANumber);
    }
    let value = Decimal::from_str(trimmed).map_err(|_| AmountError::NotANumber)?;
    if value <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }
    let value = value.normalize();
    if value.scale() > DECIMALS {
        return Err(AmountError::TooPrecise);
    }

    let wei: U256 = parse_units(value.to_string(), DECIMALS)
        .map_err(|_| AmountError::NotANumber)?
        .into();
    if wei.is_zero() || wei < min_wei {
        return Err(AmountError::BelowMinimum);
    }
    Ok(wei)
}

/// Optional sign, digits, at most one point. No exponent, no separators.
fn is_plain_decimal(input: &str) -> bool {
    let unsigned = input.strip_prefix(['-', '+']).unwrap_or(input);
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    !(integer.is_empty() && fraction.is_empty()) && digits(integer) && digits(fraction)
}
