use crate::{Address, Amount, Asset, TradeDirection};
use serde::{Deserialize, Serialize};

/// A broadcaster's signal, before it is sized to anyone's balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub direction: TradeDirection,
    /// Opaque broadcaster signature, forwarded into the settlement calldata.
    #[serde(default)]
    pub signature: String,
}

impl TradeIntent {
    pub fn new(direction: TradeDirection) -> Self {
        Self {
            direction,
            signature: String::new(),
        }
    }

    pub fn from_asset(&self) -> Asset {
        self.direction.from_asset()
    }

    pub fn to_asset(&self) -> Asset {
        self.direction.to_asset()
    }
}

/// One participant's leg of a batch. `amount` is always the trader's entire
/// source-asset balance at build time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub trader: Address,
    pub from_asset: Asset,
    pub to_asset: Asset,
    pub amount: Amount,
    pub direction: TradeDirection,
    #[serde(default)]
    pub signature: String,
    pub is_broadcaster: bool,
}

/// Ordered set of trade proposals submitted as one settlement.
///
/// When the broadcaster leg is present it is always the first element;
/// followers keep registry order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeBatch {
    proposals: Vec<TradeProposal>,
}

impl TradeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, proposal: TradeProposal) {
        self.proposals.push(proposal);
    }

    pub fn proposals(&self) -> &[TradeProposal] {
        &self.proposals
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    /// True when ordering holds: at most one broadcaster leg, and if present
    /// it leads the batch.
    pub fn is_well_ordered(&self) -> bool {
        let broadcasters = self.proposals.iter().filter(|p| p.is_broadcaster).count();
        match broadcasters {
            0 => true,
            1 => self.proposals[0].is_broadcaster,
            _ => false,
        }
    }
}

/// Executed-trade record appended to a session log after settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: u64,
    pub direction: TradeDirection,
    pub from_asset: Asset,
    pub to_asset: Asset,
    pub amount_in: Amount,
    pub amount_out: Amount,
    /// Reference price the batch cleared at, micro-PYUSD per ETH.
    pub price_micro: u128,
    pub tx_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(addr: &str, is_broadcaster: bool) -> TradeProposal {
        TradeProposal {
            trader: addr.parse().unwrap(),
            from_asset: Asset::Pyusd,
            to_asset: Asset::Eth,
            amount: Amount::new(100),
            direction: TradeDirection::Buy,
            signature: String::new(),
            is_broadcaster,
        }
    }

    #[test]
    fn test_broadcaster_first_ordering() {
        let mut batch = TradeBatch::new();
        batch.push(proposal("0x0000000000000000000000000000000000000001", true));
        batch.push(proposal("0x0000000000000000000000000000000000000002", false));
        assert!(batch.is_well_ordered());

        let mut bad = TradeBatch::new();
        bad.push(proposal("0x0000000000000000000000000000000000000002", false));
        bad.push(proposal("0x0000000000000000000000000000000000000001", true));
        assert!(!bad.is_well_ordered());
    }

    #[test]
    fn test_followers_only_batch_is_ordered() {
        let mut batch = TradeBatch::new();
        batch.push(proposal("0x0000000000000000000000000000000000000002", false));
        batch.push(proposal("0x0000000000000000000000000000000000000003", false));
        assert!(batch.is_well_ordered());
    }
}
