//! Session lifecycle and balance accounting.

use crate::store::SessionStore;
use copybot_gateway::{ChannelTransport, GatewayError};
use copybot_metrics::MetricsCollector;
use copybot_types::{
    Address, Amount, AmountError, Asset, ChannelAllocation, ChannelDefinition, ChannelProposal,
    InboundMessage, MarkToMarketError, OutboundMessage, ReferencePrice, TradeRecord, UserSession,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session for {0}")]
    NotFound(Address),

    #[error("session for {0} is not active")]
    Inactive(Address),

    #[error("insufficient {asset:?} balance for {user}: have {have}, need {need}")]
    InsufficientBalance {
        user: Address,
        asset: Asset,
        have: Amount,
        need: Amount,
    },

    #[error(transparent)]
    Transport(#[from] GatewayError),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error(transparent)]
    MarkToMarket(#[from] MarkToMarketError),
}

/// Direction of a balance mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceOp {
    Add,
    Subtract,
}

/// Owns the session store and the channel-open handshake with the
/// coordination network. All balance math is checked; a subtraction that
/// would go negative fails without mutating anything.
pub struct SessionManager {
    store: Arc<SessionStore>,
    transport: Arc<dyn ChannelTransport>,
    relayer: Address,
    fee_percent: u8,
    metrics: Arc<MetricsCollector>,
}

impl SessionManager {
    pub fn new(
        store: Arc<SessionStore>,
        transport: Arc<dyn ChannelTransport>,
        relayer: Address,
        fee_percent: u8,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            transport,
            relayer,
            fee_percent,
            metrics,
        }
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }

    /// Handle a confirmed deposit. First deposit opens a pending session and
    /// proposes a two-party channel; later deposits credit the existing
    /// session without re-running the handshake.
    pub async fn open_channel_for_user(
        &self,
        user: Address,
        deposit: Amount,
    ) -> Result<(), SessionError> {
        let now = Self::now_ms();
        let allocations = vec![
            ChannelAllocation {
                participant: user.clone(),
                asset: Asset::Pyusd,
                amount: deposit,
            },
            ChannelAllocation {
                participant: self.relayer.clone(),
                asset: Asset::Pyusd,
                amount: Amount::ZERO,
            },
        ];
        // Insert-or-fetch is a single write-lock pass: when two first
        // deposits race, exactly one opens the channel and the other lands
        // on the credit path below.
        let pending = UserSession::pending(deposit, allocations.clone(), now);
        let (entry, created) = self.store.entry_or_insert(&user, pending).await;
        if !created {
            let mut session = entry.write().await;
            let balance = session.position(Asset::Pyusd).checked_add(deposit)?;
            session.positions.insert(Asset::Pyusd, balance);
            if let Some(own) = session.allocations.first_mut() {
                own.amount = own.amount.checked_add(deposit)?;
            }
            session.last_updated = Self::now_ms();
            tracing::info!(%user, amount = %deposit, "credited deposit to existing session");
            return Ok(());
        }
        self.metrics.record_channel_opened();

        let proposal = ChannelProposal {
            definition: ChannelDefinition::two_party(user.clone(), self.relayer.clone(), now),
            allocations,
            signature: String::new(),
        };
        tracing::info!(%user, amount = %deposit, "proposing session channel");
        // The session stays pending if the network is unreachable; the
        // confirmation path activates it whenever the proposal does land.
        self.transport
            .send(&OutboundMessage::CreateSession(proposal))
            .await?;
        Ok(())
    }

    /// Dispatch one message from the coordination network.
    pub async fn handle_gateway_message(&self, message: InboundMessage) {
        match message {
            InboundMessage::SessionCreated {
                session_id,
                participants,
            } => {
                let Some(user) = participants.first().cloned() else {
                    tracing::warn!(%session_id, "session confirmation with no participants");
                    return;
                };
                match self.store.entry(&user).await {
                    Some(entry) => {
                        let mut session = entry.write().await;
                        if session.mark_active(session_id.clone(), Self::now_ms()) {
                            self.metrics.record_session_confirmed();
                            tracing::info!(%user, %session_id, "session active");
                        } else {
                            tracing::debug!(%user, %session_id, "duplicate session confirmation");
                        }
                    }
                    None => {
                        tracing::warn!(%user, %session_id, "confirmation for unknown session");
                    }
                }
            }
            InboundMessage::StateUpdated { session_id } => {
                tracing::debug!(%session_id, "state update acknowledged");
            }
            InboundMessage::Error { message } => {
                tracing::warn!(%message, "coordination network error");
            }
            InboundMessage::Pong => {
                tracing::trace!("pong");
            }
        }
    }

    /// Apply a checked balance mutation and return the new balance.
    pub async fn update_balance(
        &self,
        user: &Address,
        asset: Asset,
        op: BalanceOp,
        amount: Amount,
    ) -> Result<Amount, SessionError> {
        let entry = self
            .store
            .entry(user)
            .await
            .ok_or_else(|| SessionError::NotFound(user.clone()))?;
        let mut session = entry.write().await;
        let current = session.position(asset);
        let updated = match op {
            BalanceOp::Add => current.checked_add(amount)?,
            BalanceOp::Subtract => {
                current
                    .checked_sub(amount)
                    .map_err(|_| SessionError::InsufficientBalance {
                        user: user.clone(),
                        asset,
                        have: current,
                        need: amount,
                    })?
            }
        };
        session.positions.insert(asset, updated);
        session.last_updated = Self::now_ms();
        Ok(updated)
    }

    pub async fn update_pnl(
        &self,
        user: &Address,
        price: ReferencePrice,
    ) -> Result<(), SessionError> {
        let entry = self
            .store
            .entry(user)
            .await
            .ok_or_else(|| SessionError::NotFound(user.clone()))?;
        let mut session = entry.write().await;
        session.recompute_pnl(price)?;
        Ok(())
    }

    /// Append to the trade log. Only called after settlement confirms.
    pub async fn record_trade(
        &self,
        user: &Address,
        record: TradeRecord,
    ) -> Result<(), SessionError> {
        let entry = self
            .store
            .entry(user)
            .await
            .ok_or_else(|| SessionError::NotFound(user.clone()))?;
        let mut session = entry.write().await;
        session.trades.push(record);
        session.last_updated = Self::now_ms();
        Ok(())
    }

    /// Accrue the broadcaster's share of a realized profit. The relayer only
    /// tracks the owed amount; settlement of fees happens elsewhere.
    pub async fn accrue_fee(&self, user: &Address, profit: Amount) -> Result<Amount, SessionError> {
        let fee = Amount::new(profit.0 * self.fee_percent as u128 / 100);
        let entry = self
            .store
            .entry(user)
            .await
            .ok_or_else(|| SessionError::NotFound(user.clone()))?;
        let mut session = entry.write().await;
        session.fees.owed = session.fees.owed.checked_add(fee)?;
        Ok(fee)
    }

    /// Start copying `broadcaster`. Requires an active session.
    pub async fn set_following(
        &self,
        user: &Address,
        broadcaster: Address,
    ) -> Result<(), SessionError> {
        let entry = self
            .store
            .entry(user)
            .await
            .ok_or_else(|| SessionError::NotFound(user.clone()))?;
        let mut session = entry.write().await;
        if !session.is_active() {
            return Err(SessionError::Inactive(user.clone()));
        }
        session.following = Some(broadcaster);
        session.last_updated = Self::now_ms();
        Ok(())
    }

    pub async fn clear_following(&self, user: &Address) -> Result<(), SessionError> {
        let entry = self
            .store
            .entry(user)
            .await
            .ok_or_else(|| SessionError::NotFound(user.clone()))?;
        let mut session = entry.write().await;
        session.following = None;
        session.last_updated = Self::now_ms();
        Ok(())
    }

    pub async fn session(&self, user: &Address) -> Option<UserSession> {
        self.store.snapshot(user).await
    }

    pub async fn is_active(&self, user: &Address) -> bool {
        match self.store.snapshot(user).await {
            Some(session) => session.is_active(),
            None => false,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.is_connected().await
    }
}
