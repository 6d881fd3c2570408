//! Vault deposit monitoring: historical backfill, live subscription and the
//! manual registration path, all funneled through one idempotent apply step.

use copybot_ledger::{LedgerClient, LedgerError};
use copybot_metrics::MetricsCollector;
use copybot_sessions::{BalanceOp, SessionError, SessionManager};
use copybot_types::{Address, Amount, Asset, DepositEvent, DepositKey, VaultEvent};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("watcher already running")]
    AlreadyWatching,
}

/// Watches the vault for deposits and withdrawals.
///
/// Every deposit, no matter how it arrives, carries a `(block, tx_index)`
/// key and mutates session state at most once. Per-deposit failures are
/// logged and skipped; only an unreachable ledger at startup is fatal.
pub struct DepositWatcher {
    ledger: Arc<dyn LedgerClient>,
    sessions: Arc<SessionManager>,
    metrics: Arc<MetricsCollector>,
    backfill_blocks: u64,
    seen: Arc<RwLock<HashSet<DepositKey>>>,
    live_task: Mutex<Option<JoinHandle<()>>>,
}

impl DepositWatcher {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        sessions: Arc<SessionManager>,
        metrics: Arc<MetricsCollector>,
        backfill_blocks: u64,
    ) -> Self {
        Self {
            ledger,
            sessions,
            metrics,
            backfill_blocks,
            seen: Arc::new(RwLock::new(HashSet::new())),
            live_task: Mutex::new(None),
        }
    }

    /// Startup reachability probe. An unreachable ledger here aborts the
    /// process; everything after this degrades per-event instead.
    pub async fn initialize(&self) -> Result<u64, WatchError> {
        let block = self.ledger.latest_block().await?;
        tracing::info!(block, "ledger reachable");
        Ok(block)
    }

    /// Backfill the recent window, then follow the live event feed in a
    /// background task.
    pub async fn watch_deposits(self: &Arc<Self>) -> Result<(), WatchError> {
        {
            let task = self.live_task.lock().await;
            if task.is_some() {
                return Err(WatchError::AlreadyWatching);
            }
        }

        let latest = self.ledger.latest_block().await?;
        let from = latest.saturating_sub(self.backfill_blocks);
        tracing::info!(from, to = latest, "backfilling deposit events");

        let historical = self.ledger.deposit_events(from, latest).await?;
        for event in historical {
            self.process_deposit(event).await;
        }

        let mut feed = self.ledger.subscribe_events().await?;
        let watcher = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                match event {
                    VaultEvent::Deposit(deposit) => {
                        watcher.process_deposit(deposit).await;
                    }
                    VaultEvent::Withdrawal { user, amount, .. } => {
                        watcher.handle_withdrawal(&user, amount).await;
                    }
                }
            }
            tracing::warn!("vault event feed closed");
        });
        *self.live_task.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the live feed. Idempotent; backfill state is kept so a restart
    /// does not double-apply.
    pub async fn stop_watching(&self) {
        if let Some(handle) = self.live_task.lock().await.take() {
            handle.abort();
            tracing::info!("deposit watcher stopped");
        }
    }

    /// Apply one deposit. Returns true when it was new and session state
    /// changed, false for a duplicate delivery.
    pub async fn process_deposit(&self, event: DepositEvent) -> bool {
        {
            let mut seen = self.seen.write().await;
            if !seen.insert(event.key()) {
                tracing::debug!(
                    user = %event.user,
                    block = event.block_number,
                    tx_index = event.tx_index,
                    "skipping duplicate deposit"
                );
                return false;
            }
        }

        tracing::info!(
            user = %event.user,
            amount = %event.amount,
            block = event.block_number,
            "processing deposit"
        );
        match self
            .sessions
            .open_channel_for_user(event.user.clone(), event.amount)
            .await
        {
            Ok(()) => {
                self.metrics.record_deposit_processed();
                true
            }
            Err(SessionError::Transport(e)) => {
                // The session is recorded; only the channel proposal failed.
                // Confirmation can still arrive once the gateway recovers.
                tracing::warn!(user = %event.user, error = %e, "channel proposal not sent");
                self.metrics.record_deposit_processed();
                true
            }
            Err(e) => {
                tracing::error!(user = %event.user, error = %e, "failed to process deposit");
                false
            }
        }
    }

    /// Withdrawals decrement the off-chain balance but never close the
    /// session. A withdrawal exceeding the tracked balance is logged and
    /// the balance left untouched.
    pub async fn handle_withdrawal(&self, user: &Address, amount: Amount) {
        match self
            .sessions
            .update_balance(user, Asset::Pyusd, BalanceOp::Subtract, amount)
            .await
        {
            Ok(remaining) => {
                tracing::info!(%user, %amount, %remaining, "withdrawal applied");
            }
            Err(e) => {
                tracing::warn!(%user, %amount, error = %e, "withdrawal not applied");
            }
        }
    }

    /// Register a deposit by transaction hash, for deposits made before the
    /// relayer was running or missed by the feed. Resolving the receipt
    /// recovers the real event key, so re-registering or a later backfill of
    /// the same deposit is a no-op.
    pub async fn register_manual_deposit(
        &self,
        user: Address,
        amount: Amount,
        tx_hash: &str,
    ) -> Result<bool, WatchError> {
        let event = match self.ledger.transaction_event(tx_hash).await? {
            Some(event) => event,
            None => {
                // Receipt not available; fall back to a key derived from the
                // hash so repeated registrations still dedup.
                tracing::warn!(%user, %tx_hash, "receipt lookup failed, using derived key");
                let mut hasher = DefaultHasher::new();
                tx_hash.hash(&mut hasher);
                DepositEvent {
                    user: user.clone(),
                    amount,
                    block_number: hasher.finish(),
                    tx_index: u32::MAX,
                    timestamp: chrono::Utc::now().timestamp() as u64,
                    tx_hash: tx_hash.to_string(),
                }
            }
        };
        Ok(self.process_deposit(event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copybot_gateway::MockTransport;
    use copybot_ledger::MockLedgerClient;
    use copybot_sessions::SessionStore;
    use std::time::Duration;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    fn deposit(user: u8, block: u64, idx: u32, amount: u128) -> DepositEvent {
        DepositEvent {
            user: addr(user),
            amount: Amount::new(amount),
            block_number: block,
            tx_index: idx,
            timestamp: 1_700_000_000,
            tx_hash: format!("0xhash{block}-{idx}"),
        }
    }

    fn build_watcher(ledger: Arc<MockLedgerClient>) -> (Arc<DepositWatcher>, Arc<SessionManager>) {
        let sessions = Arc::new(SessionManager::new(
            Arc::new(SessionStore::new()),
            MockTransport::new(),
            addr(9),
            15,
            Arc::new(MetricsCollector::new()),
        ));
        let watcher = Arc::new(DepositWatcher::new(
            ledger,
            sessions.clone(),
            Arc::new(MetricsCollector::new()),
            1000,
        ));
        (watcher, sessions)
    }

    #[tokio::test]
    async fn test_initialize_fails_when_unreachable() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.set_connected(false).await;
        let (watcher, _) = build_watcher(ledger);
        assert!(watcher.initialize().await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_deposit_applies_once() {
        let ledger = Arc::new(MockLedgerClient::new());
        let (watcher, sessions) = build_watcher(ledger);

        let event = deposit(1, 10, 0, 500);
        assert!(watcher.process_deposit(event.clone()).await);
        assert!(!watcher.process_deposit(event).await);

        let session = sessions.session(&addr(1)).await.unwrap();
        assert_eq!(session.position(Asset::Pyusd), Amount::new(500));
    }

    #[tokio::test]
    async fn test_backfill_then_live_redelivery_is_idempotent() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.push_deposit(deposit(1, 50, 0, 500)).await;
        let (watcher, sessions) = build_watcher(ledger.clone());

        watcher.watch_deposits().await.unwrap();
        // Same event arrives again over the live feed.
        ledger
            .emit_live(VaultEvent::Deposit(deposit(1, 50, 0, 500)))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let session = sessions.session(&addr(1)).await.unwrap();
        assert_eq!(session.position(Asset::Pyusd), Amount::new(500));
        watcher.stop_watching().await;
    }

    #[tokio::test]
    async fn test_withdrawal_decrements_but_never_closes() {
        let ledger = Arc::new(MockLedgerClient::new());
        let (watcher, sessions) = build_watcher(ledger);

        watcher.process_deposit(deposit(1, 10, 0, 500)).await;
        watcher.handle_withdrawal(&addr(1), Amount::new(200)).await;

        let session = sessions.session(&addr(1)).await.unwrap();
        assert_eq!(session.position(Asset::Pyusd), Amount::new(300));

        // Over-withdrawal is rejected, balance untouched.
        watcher.handle_withdrawal(&addr(1), Amount::new(9999)).await;
        let session = sessions.session(&addr(1)).await.unwrap();
        assert_eq!(session.position(Asset::Pyusd), Amount::new(300));
    }

    #[tokio::test]
    async fn test_manual_registration_shares_dedup_key() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.push_deposit(deposit(1, 10, 0, 500)).await;
        let (watcher, sessions) = build_watcher(ledger);

        // Manual registration resolves the receipt and applies it.
        assert!(watcher
            .register_manual_deposit(addr(1), Amount::new(500), "0xhash10-0")
            .await
            .unwrap());

        // Backfill of the same deposit is now a duplicate.
        assert!(!watcher.process_deposit(deposit(1, 10, 0, 500)).await);
        let session = sessions.session(&addr(1)).await.unwrap();
        assert_eq!(session.position(Asset::Pyusd), Amount::new(500));
    }

    #[tokio::test]
    async fn test_manual_registration_unresolvable_tx_dedups_on_rereg() {
        let ledger = Arc::new(MockLedgerClient::new());
        let (watcher, sessions) = build_watcher(ledger);

        assert!(watcher
            .register_manual_deposit(addr(2), Amount::new(100), "0xunknown")
            .await
            .unwrap());
        assert!(!watcher
            .register_manual_deposit(addr(2), Amount::new(100), "0xunknown")
            .await
            .unwrap());

        let session = sessions.session(&addr(2)).await.unwrap();
        assert_eq!(session.position(Asset::Pyusd), Amount::new(100));
    }

    #[tokio::test]
    async fn test_watch_twice_is_rejected() {
        let ledger = Arc::new(MockLedgerClient::new());
        let (watcher, _) = build_watcher(ledger);
        watcher.watch_deposits().await.unwrap();
        assert!(matches!(
            watcher.watch_deposits().await,
            Err(WatchError::AlreadyWatching)
        ));
        watcher.stop_watching().await;
        // Stopping twice is harmless.
        watcher.stop_watching().await;
    }
}
