use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The two assets tracked by a collateral session.
///
/// A closed enum rather than free-form symbols: every balance map, trade leg
/// and settlement encoding matches on it exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    /// Collateral stablecoin, 6 decimals.
    Pyusd,
    /// Traded asset, 18 decimals.
    Eth,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown asset symbol: {0}")]
pub struct UnknownAsset(pub String);

impl Asset {
    pub fn decimals(&self) -> u32 {
        match self {
            Asset::Pyusd => 6,
            Asset::Eth => 18,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Pyusd => "pyusd",
            Asset::Eth => "eth",
        }
    }
}

impl FromStr for Asset {
    type Err = UnknownAsset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pyusd" => Ok(Asset::Pyusd),
            "eth" => Ok(Asset::Eth),
            other => Err(UnknownAsset(other.to_string())),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Trade direction as signalled by the broadcaster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    /// PYUSD -> ETH
    Buy,
    /// ETH -> PYUSD
    Sell,
}

impl TradeDirection {
    pub fn from_asset(&self) -> Asset {
        match self {
            TradeDirection::Buy => Asset::Pyusd,
            TradeDirection::Sell => Asset::Eth,
        }
    }

    pub fn to_asset(&self) -> Asset {
        match self {
            TradeDirection::Buy => Asset::Eth,
            TradeDirection::Sell => Asset::Pyusd,
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDirection::Buy => f.write_str("buy"),
            TradeDirection::Sell => f.write_str("sell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_legs() {
        assert_eq!(TradeDirection::Buy.from_asset(), Asset::Pyusd);
        assert_eq!(TradeDirection::Buy.to_asset(), Asset::Eth);
        assert_eq!(TradeDirection::Sell.from_asset(), Asset::Eth);
        assert_eq!(TradeDirection::Sell.to_asset(), Asset::Pyusd);
    }

    #[test]
    fn test_asset_parse() {
        assert_eq!("PYUSD".parse::<Asset>().unwrap(), Asset::Pyusd);
        assert_eq!("eth".parse::<Asset>().unwrap(), Asset::Eth);
        assert!("sol".parse::<Asset>().is_err());
    }
}
