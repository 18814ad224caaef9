//! Exact fixed-point amounts in a chain's smallest unit.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::WalletError;

/// Raw integer units plus decimals and symbol. Arithmetic only combines
/// amounts of the same asset, so no precision is ever lost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    #[serde(with = "raw_as_string")]
    raw: u128,
    decimals: u8,
    symbol: String,
}

impl Amount {
    pub fn from_raw(raw: u128, decimals: u8, symbol: &str) -> Self {
        Amount { raw, decimals, symbol: symbol.to_string() }
    }

    pub fn zero(decimals: u8, symbol: &str) -> Self {
        Self::from_raw(0, decimals, symbol)
    }

    /// Parses a human decimal string such as `"0.998"`.
    pub fn parse(value: &str, decimals: u8, symbol: &str) -> Result<Self, WalletError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(WalletError::InvalidAmount("empty amount".into()));
        }
        let (int_part, frac_part) = match value.split_once('.') {
            Some((i, f)) => (i, f),
            None => (value, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(WalletError::InvalidAmount(format!("not a number: {}", value)));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(WalletError::InvalidAmount(format!("not a number: {}", value)));
        }
        let frac_trimmed = frac_part.trim_end_matches('0');
        if frac_trimmed.len() > decimals as usize {
            return Err(WalletError::InvalidAmount(format!(
                "{} has more than {} decimal places",
                value, decimals
            )));
        }

        let scale = pow10(decimals)?;
        let int_value: u128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| WalletError::InvalidAmount(format!("amount out of range: {}", value)))?
        };
        let mut frac_value: u128 = 0;
        if !frac_trimmed.is_empty() {
            let digits: u128 = frac_trimmed
                .parse()
                .map_err(|_| WalletError::InvalidAmount(format!("amount out of range: {}", value)))?;
            frac_value = digits * pow10(decimals - frac_trimmed.len() as u8)?;
        }
        let raw = int_value
            .checked_mul(scale)
            .and_then(|v| v.checked_add(frac_value))
            .ok_or_else(|| WalletError::InvalidAmount(format!("amount out of range: {}", value)))?;
        Ok(Amount::from_raw(raw, decimals, symbol))
    }

    /// Parses a raw integer string in smallest units.
    pub fn parse_raw(value: &str, decimals: u8, symbol: &str) -> Result<Self, WalletError> {
        let raw = value
            .trim()
            .parse::<u128>()
            .map_err(|_| WalletError::InvalidAmount(format!("invalid raw amount: {}", value)))?;
        Ok(Amount::from_raw(raw, decimals, symbol))
    }

    pub fn raw(&self) -> u128 {
        self.raw
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Same symbol and decimals.
    pub fn same_asset(&self, other: &Amount) -> bool {
        self.decimals == other.decimals && self.symbol.eq_ignore_ascii_case(&other.symbol)
    }

    fn ensure_same_asset(&self, other: &Amount) -> Result<(), WalletError> {
        if self.same_asset(other) {
            Ok(())
        } else {
            Err(WalletError::InvalidAmount(format!(
                "cannot combine {} ({} decimals) with {} ({} decimals)",
                self.symbol, self.decimals, other.symbol, other.decimals
            )))
        }
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount, WalletError> {
        self.ensure_same_asset(other)?;
        let raw = self
            .raw
            .checked_add(other.raw)
            .ok_or_else(|| WalletError::InvalidAmount("amount overflow".into()))?;
        Ok(Amount::from_raw(raw, self.decimals, &self.symbol))
    }

    /// Fails when the result would be negative.
    pub fn checked_sub(&self, other: &Amount) -> Result<Amount, WalletError> {
        self.ensure_same_asset(other)?;
        let raw = self.raw.checked_sub(other.raw).ok_or_else(|| {
            WalletError::InvalidAmount(format!("{} is less than {}", self, other))
        })?;
        Ok(Amount::from_raw(raw, self.decimals, &self.symbol))
    }

    pub fn compare(&self, other: &Amount) -> Result<Ordering, WalletError> {
        self.ensure_same_asset(other)?;
        Ok(self.raw.cmp(&other.raw))
    }

    /// Decimal string without trailing zeros, e.g. `0.998`.
    pub fn to_decimal_string(&self) -> String {
        if self.decimals == 0 {
            return self.raw.to_string();
        }
        let digits = format!("{:0>width$}", self.raw, width = self.decimals as usize + 1);
        let split = digits.len() - self.decimals as usize;
        let (int_part, frac_part) = digits.split_at(split);
        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.is_empty() {
            int_part.to_string()
        } else {
            format!("{}.{}", int_part, frac_part)
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.symbol)
    }
}

fn pow10(exp: u8) -> Result<u128, WalletError> {
    10u128
        .checked_pow(exp as u32)
        .ok_or_else(|| WalletError::InvalidAmount(format!("unsupported decimals: {}", exp)))
}

mod raw_as_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_and_format() {
        let a = Amount::parse("0.998", 18, "ETH").unwrap();
        assert_eq!(a.raw(), 998_000_000_000_000_000);
        assert_eq!(a.to_decimal_string(), "0.998");
        assert_eq!(Amount::parse("1", 8, "BTC").unwrap().raw(), 100_000_000);
        assert_eq!(Amount::parse(".5", 6, "TRX").unwrap().raw(), 500_000);
        assert_eq!(Amount::parse("2.", 6, "TRX").unwrap().raw(), 2_000_000);
        assert_eq!(Amount::parse("1.500", 2, "X").unwrap().raw(), 150);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Amount::parse("", 18, "ETH").is_err());
        assert!(Amount::parse(".", 18, "ETH").is_err());
        assert!(Amount::parse("-1", 18, "ETH").is_err());
        assert!(Amount::parse("1e5", 18, "ETH").is_err());
        assert!(Amount::parse("0.123", 2, "X").is_err());
    }

    #[test]
    fn test_sub_exact() {
        let balance = Amount::parse("1.0", 18, "ETH").unwrap();
        let fee = Amount::parse("0.002", 18, "ETH").unwrap();
        let rest = balance.checked_sub(&fee).unwrap();
        assert_eq!(rest.to_decimal_string(), "0.998");
        assert!(fee.checked_sub(&balance).is_err());
    }

    #[test]
    fn test_mixed_assets_rejected() {
        let eth = Amount::parse("1", 18, "ETH").unwrap();
        let usdt = Amount::parse("1", 6, "USDT").unwrap();
        assert!(eth.checked_add(&usdt).is_err());
        assert!(eth.compare(&usdt).is_err());
    }

    #[test]
    fn test_display_and_serde() {
        let a = Amount::from_raw(123_450_000, 8, "BTC");
        assert_eq!(a.to_string(), "1.2345 BTC");
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"123450000\""));
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_zero_decimals() {
        let a = Amount::parse("42", 0, "PTS").unwrap();
        assert_eq!(a.to_decimal_string(), "42");
    }

    proptest! {
        #[test]
        fn prop_decimal_string_reparses(raw in 0u128..10u128.pow(30), decimals in 0u8..19) {
            let a = Amount::from_raw(raw, decimals, "T");
            let back = Amount::parse(&a.to_decimal_string(), decimals, "T").unwrap();
            prop_assert_eq!(back.raw(), raw);
        }

        #[test]
        fn prop_add_then_sub_is_identity(a in 0u128..u64::MAX as u128, b in 0u128..u64::MAX as u128) {
            let x = Amount::from_raw(a, 8, "BTC");
            let y = Amount::from_raw(b, 8, "BTC");
            let sum = x.checked_add(&y).unwrap();
            prop_assert_eq!(sum.checked_sub(&y).unwrap(), x);
        }
    }
}
