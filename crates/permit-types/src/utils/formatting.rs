//! String formatting utilities for log output.

use alloy_primitives::U256;

/// Shortens a hex identifier to its first 10 characters for display.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 10 {
		id.to_string()
	} else {
		format!("{}..", &id[..10])
	}
}

/// Formats a base-unit token amount with `decimals` decimal places.
///
/// Trailing zeros of the fractional part are dropped, so one full token with
/// 18 decimals renders as "1" and one and a half as "1.5".
pub fn format_token_amount(amount: U256, decimals: u8) -> String {
	let digits = amount.to_string();
	if decimals == 0 {
		return digits;
	}

	let decimal_places = decimals as usize;
	let (integer_part, decimal_part) = if digits.len() <= decimal_places {
		(
			"0".to_string(),
			format!("{:0>width$}", digits, width = decimal_places),
		)
	} else {
		let split_pos = digits.len() - decimal_places;
		(digits[..split_pos].to_string(), digits[split_pos..].to_string())
	};

	let decimal_trimmed = decimal_part.trim_end_matches('0');
	if decimal_trimmed.is_empty() {
		integer_part
	} else {
		format!("{}.{}", integer_part, decimal_trimmed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("0x12345678"), "0x12345678");
		assert_eq!(truncate_id("0x1234567890abcdef"), "0x12345678..");
	}

	#[test]
	fn test_format_token_amount() {
		let ether = U256::from(10u64).pow(U256::from(18));
		assert_eq!(format_token_amount(ether, 18), "1");
		assert_eq!(format_token_amount(ether * U256::from(10), 18), "10");
		assert_eq!(
			format_token_amount(U256::from(1_500_000_000_000_000_000u64), 18),
			"1.5"
		);
		assert_eq!(
			format_token_amount(U256::from(21_000_000_000_000u64), 18),
			"0.000021"
		);
		assert_eq!(format_token_amount(U256::from(1_500_000u64), 6), "1.5");
		assert_eq!(format_token_amount(U256::from(1000u64), 0), "1000");
		assert_eq!(format_token_amount(U256::ZERO, 18), "0");
	}
}
