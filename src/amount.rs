// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Lossless amount arithmetic.
//!
//! Human amounts are converted to smallest units by string manipulation
//! only: no floating point anywhere near money. Fractional digits beyond
//! the asset's decimals are truncated, never rounded.

use alloy::primitives::U256;

use crate::error::WalletError;

/// Convert a human-readable decimal amount to smallest units.
///
/// `"1.5"` at 6 decimals becomes `1_500_000`. Extra fractional digits are
/// truncated: `"1.2345678"` at 6 decimals becomes `1_234_567`.
pub fn to_smallest_units(amount: &str, decimals: u8) -> Result<U256, WalletError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(WalletError::invalid_argument("amount must not be empty"));
    }
    if trimmed.starts_with('-') {
        return Err(WalletError::invalid_argument(format!(
            "amount must not be negative: {trimmed}"
        )));
    }

    let mut parts = trimmed.splitn(3, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    if parts.next().is_some() {
        return Err(WalletError::invalid_argument(format!(
            "malformed amount: {trimmed}"
        )));
    }
    if whole.is_empty() && fraction.is_empty() {
        return Err(WalletError::invalid_argument(format!(
            "malformed amount: {trimmed}"
        )));
    }
    if !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(WalletError::invalid_argument(format!(
            "malformed amount: {trimmed}"
        )));
    }

    // Pad or truncate the fraction to exactly `decimals` digits.
    let width = decimals as usize;
    let mut fraction = fraction.to_string();
    fraction.truncate(width);
    let padded = format!("{fraction:0<width$}");

    let digits = format!(
        "{}{}",
        if whole.is_empty() { "0" } else { whole },
        padded
    );
    U256::from_str_radix(&digits, 10)
        .map_err(|e| WalletError::invalid_argument(format!("amount out of range: {e}")))
}

/// Format smallest units back into a human-readable decimal string.
pub fn from_smallest_units(amount: U256, decimals: u8) -> String {
    if amount.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        if trimmed.is_empty() {
            whole.to_string()
        } else {
            format!("{whole}.{trimmed}")
        }
    }
}

/// Rescale a smallest-unit integer string to a fixed 18-decimal
/// representation: right-pad when the asset has fewer decimals, truncate the
/// excess digits when it has more.
pub fn scale_to_18(raw: &str, decimals: u8) -> String {
    let digits = raw.trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return "0".to_string();
    }
    let normalized = digits.trim_start_matches('0');
    if normalized.is_empty() {
        return "0".to_string();
    }

    if decimals <= 18 {
        let zeros = (18 - decimals) as usize;
        format!("{normalized}{}", "0".repeat(zeros))
    } else {
        let cut = (decimals - 18) as usize;
        if normalized.len() <= cut {
            "0".to_string()
        } else {
            normalized[..normalized.len() - cut].to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_amount_scales_by_decimals() {
        assert_eq!(
            to_smallest_units("1", 18).unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
        assert_eq!(to_smallest_units("1", 6).unwrap(), U256::from(1_000_000u64));
    }

    #[test]
    fn fractional_amount_is_exact() {
        assert_eq!(
            to_smallest_units("1.5", 6).unwrap(),
            U256::from(1_500_000u64)
        );
        assert_eq!(
            to_smallest_units("0.001", 18).unwrap(),
            U256::from(1_000_000_000_000_000u64)
        );
        assert_eq!(to_smallest_units(".5", 6).unwrap(), U256::from(500_000u64));
    }

    #[test]
    fn excess_fraction_truncates_instead_of_rounding() {
        assert_eq!(
            to_smallest_units("1.9999999", 6).unwrap(),
            U256::from(1_999_999u64)
        );
        assert_eq!(to_smallest_units("0.0000009", 6).unwrap(), U256::ZERO);
    }

    #[test]
    fn zero_parses_to_zero() {
        assert_eq!(to_smallest_units("0", 6).unwrap(), U256::ZERO);
        assert_eq!(to_smallest_units("0.0", 6).unwrap(), U256::ZERO);
    }

    #[test]
    fn malformed_amounts_are_rejected() {
        for bad in ["", ".", "1.2.3", "abc", "-1", "1,5", "1e5"] {
            assert!(to_smallest_units(bad, 6).is_err(), "{bad} must be rejected");
        }
    }

    #[test]
    fn conversion_roundtrips() {
        for (human, decimals) in [("1.5", 6u8), ("0.001", 18), ("42", 8)] {
            let smallest = to_smallest_units(human, decimals).unwrap();
            assert_eq!(from_smallest_units(smallest, decimals), human);
        }
    }

    #[test]
    fn scale_to_18_pads_right() {
        assert_eq!(scale_to_18("1500000", 6), "1500000000000000000");
        assert_eq!(scale_to_18("1", 18), "1");
        assert_eq!(scale_to_18("0", 6), "0");
        assert_eq!(scale_to_18("007", 17), "70");
    }

    #[test]
    fn scale_to_18_truncates_extra_precision() {
        assert_eq!(scale_to_18("123456", 20), "1234");
        assert_eq!(scale_to_18("12", 20), "0");
    }

    #[test]
    fn scale_to_18_ignores_garbage() {
        assert_eq!(scale_to_18("not-a-number", 6), "0");
        assert_eq!(scale_to_18("", 6), "0");
    }
}
