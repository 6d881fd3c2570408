use crate::{
    serde_i128, Address, Amount, Asset, ChannelAllocation, MarkToMarketError, ReferencePrice,
    TradeRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session lifecycle. Monotonic: `Pending -> Active`, never back.
/// There is no closed state; withdrawals only decrement balances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
}

/// Profit and loss, micro-PYUSD. Recomputed on demand against a
/// caller-supplied reference price.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pnl {
    #[serde(with = "serde_i128")]
    pub realized: i128,
    #[serde(with = "serde_i128")]
    pub unrealized: i128,
    #[serde(with = "serde_i128")]
    pub total: i128,
}

/// Broadcaster revenue share accrued against this session. Never settled
/// automatically by the relayer core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    pub paid: Amount,
    pub owed: Amount,
}

/// Off-chain record of one depositor's collateral position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    pub status: SessionStatus,
    pub positions: HashMap<Asset, Amount>,
    pub allocations: Vec<ChannelAllocation>,
    pub following: Option<Address>,
    pub pnl: Pnl,
    pub fees: Fees,
    /// Append-only; grows only after successful settlement.
    pub trades: Vec<TradeRecord>,
    /// Identifier assigned by the coordination network on confirmation.
    pub session_id: Option<String>,
    pub created_at: u64,
    pub last_updated: u64,
}

impl UserSession {
    /// A fresh pending session seeded with the first confirmed deposit.
    pub fn pending(deposit: Amount, allocations: Vec<ChannelAllocation>, now: u64) -> Self {
        let mut positions = HashMap::new();
        positions.insert(Asset::Pyusd, deposit);
        positions.insert(Asset::Eth, Amount::ZERO);
        Self {
            status: SessionStatus::Pending,
            positions,
            allocations,
            following: None,
            pnl: Pnl::default(),
            fees: Fees::default(),
            trades: Vec::new(),
            session_id: None,
            created_at: now,
            last_updated: now,
        }
    }

    pub fn position(&self, asset: Asset) -> Amount {
        self.positions.get(&asset).copied().unwrap_or(Amount::ZERO)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Collateral the user brought in, per the agreed channel split.
    pub fn initial_deposit(&self) -> Amount {
        self.allocations
            .first()
            .map(|a| a.amount)
            .unwrap_or(Amount::ZERO)
    }

    /// Flip to active. Returns false when already active (status is
    /// monotonic, confirmations can arrive more than once).
    pub fn mark_active(&mut self, session_id: String, now: u64) -> bool {
        if self.status == SessionStatus::Active {
            return false;
        }
        self.status = SessionStatus::Active;
        self.session_id = Some(session_id);
        self.last_updated = now;
        true
    }

    /// Recompute unrealized and total PnL against the given price.
    pub fn recompute_pnl(&mut self, price: ReferencePrice) -> Result<(), MarkToMarketError> {
        let total_value = price.mark_to_market(&self.positions)?;
        let unrealized = total_value.0 as i128 - self.initial_deposit().0 as i128;
        self.pnl.unrealized = unrealized;
        self.pnl.total = self.pnl.realized + unrealized;
        Ok(())
    }
}
