use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An EVM-style account address, normalized to lowercase hex.
///
/// Lowercasing happens at parse time so that the same account never maps to
/// two session entries differing only in checksum case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("address must be 20 bytes of hex: {0}")]
    BadLength(String),

    #[error("address contains non-hex characters: {0}")]
    NotHex(String),
}

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 20 raw address bytes (without the 0x prefix).
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        for (i, chunk) in self.0.as_bytes()[2..].chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16).unwrap_or(0) as u8;
            let lo = (chunk[1] as char).to_digit(16).unwrap_or(0) as u8;
            out[i] = (hi << 4) | lo;
        }
        out
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(body) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) else {
            return Err(AddressError::MissingPrefix(s.to_string()));
        };
        if body.len() != 40 {
            return Err(AddressError::BadLength(s.to_string()));
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex(s.to_string()));
        }
        Ok(Address(format!("0x{}", body.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> String {
        addr.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        let a: Address = "0xAbCd000000000000000000000000000000000001".parse().unwrap();
        assert_eq!(a.as_str(), "0xabcd000000000000000000000000000000000001");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("abcd".parse::<Address>().is_err());
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzzzz000000000000000000000000000000000001"
            .parse::<Address>()
            .is_err());
    }

    #[test]
    fn test_to_bytes_roundtrip() {
        let a: Address = "0xff00000000000000000000000000000000000001".parse().unwrap();
        let bytes = a.to_bytes();
        assert_eq!(bytes[0], 0xff);
        assert_eq!(bytes[19], 0x01);
    }

    #[test]
    fn test_serde_lowercases() {
        let a: Address = serde_json::from_str("\"0xABCD000000000000000000000000000000000001\"").unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            "\"0xabcd000000000000000000000000000000000001\""
        );
    }
}
