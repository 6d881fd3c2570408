use async_trait::async_trait;
use copybot_types::{Address, Amount, DepositEvent, VaultEvent};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Read access to the vault and the underlying ledger.
///
/// The watcher, the API's L1 balance fallback and the manual deposit path
/// all go through this seam; tests swap in [`MockLedgerClient`].
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Latest block height. Also serves as the reachability probe at
    /// startup.
    async fn latest_block(&self) -> Result<u64, LedgerError>;

    /// Deposit events in an inclusive historical block range.
    async fn deposit_events(&self, from: u64, to: u64) -> Result<Vec<DepositEvent>, LedgerError>;

    /// Live vault event feed (deposits and withdrawals).
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<VaultEvent>, LedgerError>;

    /// On-chain deposit amount for a user; the L1 fallback balance source.
    async fn deposit_of(&self, user: &Address) -> Result<Amount, LedgerError>;

    /// Resolve the vault deposit event carried by a given transaction, if
    /// any. Backs the manual registration path.
    async fn transaction_event(&self, tx_hash: &str)
        -> Result<Option<DepositEvent>, LedgerError>;

    async fn is_connected(&self) -> bool;
}

/// In-memory ledger for tests: events are pushed by the test and replayed
/// through both the backfill and subscription paths.
pub struct MockLedgerClient {
    connected: Arc<RwLock<bool>>,
    block: Arc<RwLock<u64>>,
    events: Arc<RwLock<Vec<VaultEvent>>>,
    deposits: Arc<RwLock<HashMap<Address, Amount>>>,
    live_tx: Arc<RwLock<Option<mpsc::Sender<VaultEvent>>>>,
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self {
            connected: Arc::new(RwLock::new(true)),
            block: Arc::new(RwLock::new(100)),
            events: Arc::new(RwLock::new(Vec::new())),
            deposits: Arc::new(RwLock::new(HashMap::new())),
            live_tx: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_connected(&self, connected: bool) {
        *self.connected.write().await = connected;
    }

    pub async fn set_block(&self, block: u64) {
        *self.block.write().await = block;
    }

    /// Record a historical deposit, visible to backfill and receipt lookup.
    pub async fn push_deposit(&self, event: DepositEvent) {
        let mut deposits = self.deposits.write().await;
        let entry = deposits.entry(event.user.clone()).or_insert(Amount::ZERO);
        *entry = entry
            .checked_add(event.amount)
            .unwrap_or(*entry);
        drop(deposits);
        self.events.write().await.push(VaultEvent::Deposit(event));
    }

    /// Deliver an event to the live subscription, if one is open.
    pub async fn emit_live(&self, event: VaultEvent) {
        if let VaultEvent::Deposit(deposit) = &event {
            self.events.write().await.push(VaultEvent::Deposit(deposit.clone()));
        }
        let tx = self.live_tx.read().await;
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn latest_block(&self) -> Result<u64, LedgerError> {
        if !*self.connected.read().await {
            return Err(LedgerError::ConnectionFailed("mock disconnected".into()));
        }
        Ok(*self.block.read().await)
    }

    async fn deposit_events(&self, from: u64, to: u64) -> Result<Vec<DepositEvent>, LedgerError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter_map(|e| match e {
                VaultEvent::Deposit(d) if d.block_number >= from && d.block_number <= to => {
                    Some(d.clone())
                }
                _ => None,
            })
            .collect())
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<VaultEvent>, LedgerError> {
        let (tx, rx) = mpsc::channel(64);
        *self.live_tx.write().await = Some(tx);
        Ok(rx)
    }

    async fn deposit_of(&self, user: &Address) -> Result<Amount, LedgerError> {
        Ok(self
            .deposits
            .read()
            .await
            .get(user)
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn transaction_event(
        &self,
        tx_hash: &str,
    ) -> Result<Option<DepositEvent>, LedgerError> {
        let events = self.events.read().await;
        Ok(events.iter().find_map(|e| match e {
            VaultEvent::Deposit(d) if d.tx_hash == tx_hash => Some(d.clone()),
            _ => None,
        }))
    }

    async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }
}
