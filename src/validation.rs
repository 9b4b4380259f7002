/// Input validation for request data
///
/// Request bodies are deserialized into typed structs first; these helpers
/// cover the checks serde cannot express, so malformed values are rejected
/// at the boundary instead of flowing into settlement or pricing arithmetic.
use crate::error::{MarketError, Result};
use rust_decimal::Decimal;

/// Default and maximum page sizes for list endpoints
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Validate a wallet address and return it lowercased
///
/// # Arguments
/// * `address` - `0x`-prefixed 20-byte hex address
/// * `field_name` - Name of the field for error messages
pub fn validate_address(address: &str, field_name: &str) -> Result<String> {
    let trimmed = address.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| {
            MarketError::Validation(format!("{} must start with 0x: {}", field_name, address))
        })?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MarketError::Validation(format!(
            "{} is not a 20-byte hex address: {}",
            field_name, address
        )));
    }

    Ok(format!("0x{}", hex_part.to_ascii_lowercase()))
}

/// Validate a token amount (stake, wager, payment)
///
/// # Arguments
/// * `amount` - Amount in token units
/// * `max` - Optional upper bound
pub fn validate_amount(amount: i64, field_name: &str, max: Option<i64>) -> Result<()> {
    if amount <= 0 {
        return Err(MarketError::Validation(format!(
            "{} must be positive: {}",
            field_name, amount
        )));
    }

    if let Some(max) = max {
        if amount > max {
            return Err(MarketError::Validation(format!(
                "{} {} exceeds maximum {}",
                field_name, amount, max
            )));
        }
    }

    Ok(())
}

/// Validate an asset price (must be positive)
pub fn validate_positive_price(price: Decimal, field_name: &str) -> Result<()> {
    if price <= Decimal::ZERO {
        return Err(MarketError::Validation(format!(
            "{} must be positive: {}",
            field_name, price
        )));
    }
    Ok(())
}

/// Validate an opaque entity id from a path segment
pub fn validate_id(id: &str, prefix: &str) -> Result<()> {
    let valid = id.starts_with(prefix)
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(MarketError::Validation(format!("Invalid id: {}", id)));
    }
    Ok(())
}

/// Clamp a requested page size into [1, MAX_LIMIT]
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_address() {
        let mixed = "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266";
        assert_eq!(
            validate_address(mixed, "address").unwrap(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );

        assert!(validate_address("f39fd6e51aad88f6f4ce6ab8827279cfffb92266", "address").is_err());
        assert!(validate_address("0x1234", "address").is_err());
        assert!(validate_address("0xzz9fd6e51aad88f6f4ce6ab8827279cfffb92266", "address").is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(1, "stake", None).is_ok());
        assert!(validate_amount(100, "stake", Some(100)).is_ok());

        assert!(validate_amount(0, "stake", None).is_err());
        assert!(validate_amount(-1, "stake", None).is_err());
        assert!(validate_amount(101, "stake", Some(100)).is_err());
    }

    #[test]
    fn test_validate_positive_price() {
        assert!(validate_positive_price(dec!(92000), "target").is_ok());
        assert!(validate_positive_price(dec!(0), "target").is_err());
        assert!(validate_positive_price(dec!(-1), "target").is_err());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("sig_18c2f_0a1b2c3d", "sig_").is_ok());
        assert!(validate_id("wgr_18c2f_0a1b2c3d", "sig_").is_err());
        assert!(validate_id("sig_'; DROP TABLE", "sig_").is_err());
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(1000)), MAX_LIMIT);
    }
}
