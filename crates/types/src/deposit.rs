use crate::{Address, Amount};
use serde::{Deserialize, Serialize};

/// A confirmed `Deposit` event read from the vault contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub user: Address,
    pub amount: Amount,
    pub block_number: u64,
    pub tx_index: u32,
    pub timestamp: u64,
    pub tx_hash: String,
}

/// Idempotency key for deposit processing: a deposit mutates state at most
/// once, whether it arrives via backfill, live subscription or manual
/// registration.
pub type DepositKey = (u64, u32);

impl DepositEvent {
    pub fn key(&self) -> DepositKey {
        (self.block_number, self.tx_index)
    }
}

/// Vault events consumed by the deposit watcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VaultEvent {
    Deposit(DepositEvent),
    /// Withdrawals only decrement the off-chain balance; sessions are never
    /// closed.
    Withdrawal {
        user: Address,
        amount: Amount,
        timestamp: u64,
    },
}
