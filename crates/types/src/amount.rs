use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unsigned token quantity in base units (micro-PYUSD or wei).
///
/// Serialized as a decimal string: session balances routinely exceed what a
/// JSON number can carry losslessly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(pub u128);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount: {0}")]
    Invalid(String),

    #[error("amount overflow")]
    Overflow,

    #[error("amount underflow")]
    Underflow,
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(value: u128) -> Self {
        Amount(value)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(AmountError::Underflow)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u128>()
            .map(Amount)
            .map_err(|_| AmountError::Invalid(s.to_string()))
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Amount> for String {
    fn from(a: Amount) -> String {
        a.0.to_string()
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self {
        Amount(v)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serde helpers for signed PnL values, string-encoded for the same
/// precision reasons as [`Amount`].
pub mod serde_i128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.trim().parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_sub_underflow() {
        let a = Amount::new(5);
        let b = Amount::new(10);
        assert_eq!(a.checked_sub(b), Err(AmountError::Underflow));
        assert_eq!(b.checked_sub(a), Ok(Amount::new(5)));
    }

    #[test]
    fn test_checked_add_overflow() {
        let a = Amount::new(u128::MAX);
        assert_eq!(a.checked_add(Amount::new(1)), Err(AmountError::Overflow));
    }

    #[test]
    fn test_serde_string_roundtrip() {
        let a = Amount::new(1_000_000_000_000_000_000_000);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"1000000000000000000000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("1.5".parse::<Amount>().is_err());
        assert!("-3".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
    }
}
