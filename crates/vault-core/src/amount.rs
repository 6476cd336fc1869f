//! Decimal string <-> base unit conversion for user-entered amounts

use ethers::types::U256;

use crate::error::VaultError;

/// Parse a user-entered decimal amount into base units.
///
/// Whitespace is stripped first. Only plain non-negative decimals are
/// accepted (`12`, `12.`, `12.34`); signs, exponents and digit separators are
/// rejected. Fractional digits beyond `decimals` are truncated, never rounded.
pub fn parse_units(input: &str, decimals: u8) -> Result<U256, VaultError> {
    let sanitized: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    if !is_plain_decimal(&sanitized) {
        return Err(VaultError::InvalidAmountFormat(input.to_string()));
    }

    let (integer_part, fraction_part) = match sanitized.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (sanitized.as_str(), ""),
    };

    let decimals = decimals as usize;
    let mut fraction: String = fraction_part.chars().take(decimals).collect();
    while fraction.len() < decimals {
        fraction.push('0');
    }

    let digits = format!("{}{}", integer_part, fraction);
    U256::from_dec_str(&digits)
        .map_err(|_| VaultError::InvalidAmount(format!("{} does not fit in 256 bits", input.trim())))
}

/// Render base units as a decimal string with trailing fractional zeros trimmed
pub fn format_units(value: U256, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let scale = U256::exp10(decimals as usize);
    let integer = value / scale;
    let remainder = value % scale;

    if remainder.is_zero() {
        return integer.to_string();
    }

    let fraction = format!("{:0>width$}", remainder.to_string(), width = decimals as usize);
    format!("{}.{}", integer, fraction.trim_end_matches('0'))
}

// ^\d+\.?\d*$
fn is_plain_decimal(s: &str) -> bool {
    let mut chars = s.chars().peekable();
    match chars.peek() {
        Some(c) if c.is_ascii_digit() => {}
        _ => return false,
    }

    let mut seen_dot = false;
    for c in chars {
        match c {
            '0'..='9' => {}
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!(parse_units("1", 18).unwrap(), U256::exp10(18));
        assert_eq!(parse_units("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(parse_units("0.000001", 6).unwrap(), U256::one());
        assert_eq!(parse_units("12.", 2).unwrap(), U256::from(1200u64));
    }

    #[test]
    fn test_parse_truncates_excess_fraction() {
        // 1.9999999 with 6 decimals drops the 7th digit instead of rounding up
        assert_eq!(parse_units("1.9999999", 6).unwrap(), U256::from(1_999_999u64));
        assert_eq!(parse_units("0.0000009", 6).unwrap(), U256::zero());
        assert_eq!(parse_units("7.89", 0).unwrap(), U256::from(7u64));
    }

    #[test]
    fn test_parse_strips_whitespace() {
        assert_eq!(parse_units("  1 000 ", 0).unwrap(), U256::from(1000u64));
        assert_eq!(parse_units("\t0.5\n", 1).unwrap(), U256::from(5u64));
    }

    #[test]
    fn test_parse_rejects_non_plain_decimals() {
        for bad in ["", ".5", "-1", "+1", "1e18", "1,000", "1.2.3", "abc", "0x10", "1_000"] {
            assert!(
                matches!(parse_units(bad, 18), Err(VaultError::InvalidAmountFormat(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_parse_overflow_is_invalid_amount() {
        let huge = "9".repeat(90);
        assert!(matches!(parse_units(&huge, 18), Err(VaultError::InvalidAmount(_))));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::exp10(18), 18), "1");
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(1u64), 6), "0.000001");
        assert_eq!(format_units(U256::zero(), 6), "0");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
    }

    #[test]
    fn test_round_trip_canonical_strings() {
        for (s, d) in [("1", 18), ("0.1", 18), ("123.456", 6), ("0.000001", 6), ("42", 0), ("3.14159265", 8)] {
            let parsed = parse_units(s, d).unwrap();
            assert_eq!(format_units(parsed, d), s);
        }
    }
}
