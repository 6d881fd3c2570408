//! Copy-trade broadcast: size every participant's leg, reserve balances,
//! settle once on-ledger, then commit or roll back.

use crate::registry::{FollowerRegistry, RegistryError};
use copybot_metrics::MetricsCollector;
use copybot_sessions::{BalanceOp, SessionError, SessionManager};
use copybot_settlement::{BatchSubmitter, SettlementReceipt, SubmitError};
use copybot_types::{
    Address, Amount, Asset, PriceError, ReferencePrice, TradeBatch, TradeIntent, TradeProposal,
    TradeRecord,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("broadcaster {0} has no active session")]
    BroadcasterInactive(Address),

    #[error("broadcaster {0} has no source balance to trade")]
    BroadcasterEmptyBalance(Address),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Settlement(#[from] SubmitError),

    #[error(transparent)]
    Price(#[from] PriceError),
}

/// What a broadcast actually did. `broadcaster_tx` is the settlement hash
/// when the broadcaster leg rode in the batch, or the hash the broadcaster
/// already settled out-of-band.
#[derive(Clone, Debug, Default)]
pub struct BroadcastOutcome {
    pub broadcaster_executed: bool,
    pub followers_executed: Vec<Address>,
    pub settlement: Option<SettlementReceipt>,
    pub broadcaster_tx: Option<String>,
}

struct ReservedLeg {
    proposal: TradeProposal,
}

/// Drives one broadcaster signal through follower resolution, balance
/// reservation, settlement and commit.
///
/// Balance changes are two-phase: source balances are debited before
/// submission and either converted into the destination asset on a
/// confirmed settlement or restored verbatim on failure. Trade logs and
/// PnL only move on the commit path.
pub struct TradeExecutor {
    sessions: Arc<SessionManager>,
    registry: Arc<dyn FollowerRegistry>,
    submitter: Arc<dyn BatchSubmitter>,
    metrics: Arc<MetricsCollector>,
    min_trade_pyusd: Amount,
    min_trade_eth: Amount,
}

impl TradeExecutor {
    pub fn new(
        sessions: Arc<SessionManager>,
        registry: Arc<dyn FollowerRegistry>,
        submitter: Arc<dyn BatchSubmitter>,
        metrics: Arc<MetricsCollector>,
        min_trade_pyusd: Amount,
        min_trade_eth: Amount,
    ) -> Self {
        Self {
            sessions,
            registry,
            submitter,
            metrics,
            min_trade_pyusd,
            min_trade_eth,
        }
    }

    fn minimum(&self, asset: Asset) -> Amount {
        match asset {
            Asset::Pyusd => self.min_trade_pyusd,
            Asset::Eth => self.min_trade_eth,
        }
    }

    /// Execute a broadcaster's signal across every eligible follower.
    ///
    /// `pre_executed` carries the transaction hash when the broadcaster
    /// already traded directly on the ledger and only followers are copied.
    /// Each participant trades their entire source-asset balance; everyone
    /// clears at the same reference price.
    pub async fn broadcast_trade(
        &self,
        broadcaster: &Address,
        intent: &TradeIntent,
        price: ReferencePrice,
        pre_executed: Option<String>,
    ) -> Result<BroadcastOutcome, ExecuteError> {
        let from_asset = intent.from_asset();
        let to_asset = intent.to_asset();
        let minimum = self.minimum(from_asset);
        let pre_executed_leg = pre_executed.is_some();

        if !self.sessions.is_active(broadcaster).await {
            return Err(ExecuteError::BroadcasterInactive(broadcaster.clone()));
        }

        // Resolve and validate everything before touching a single balance.
        let followers = self.registry.followers_of(broadcaster).await?;
        tracing::info!(
            %broadcaster,
            direction = %intent.direction,
            followers = followers.len(),
            pre_executed = pre_executed_leg,
            "broadcasting trade"
        );
        if followers.is_empty() {
            tracing::info!(%broadcaster, "no followers registered, nothing to copy");
            return Ok(BroadcastOutcome {
                broadcaster_tx: pre_executed,
                ..BroadcastOutcome::default()
            });
        }

        let mut eligible: Vec<(Address, Amount)> = Vec::new();
        for follower in followers {
            let Some(session) = self.sessions.session(&follower).await else {
                self.exclude(&follower, "no session");
                continue;
            };
            if !session.is_active() {
                self.exclude(&follower, "session not active");
                continue;
            }
            let balance = session.position(from_asset);
            if balance < minimum {
                self.exclude(&follower, "balance below minimum");
                continue;
            }
            eligible.push((follower, balance));
        }

        if eligible.is_empty() && pre_executed_leg {
            tracing::info!(%broadcaster, "no eligible followers, nothing to settle");
            return Ok(BroadcastOutcome {
                broadcaster_tx: pre_executed,
                ..BroadcastOutcome::default()
            });
        }

        // Reservation phase. Broadcaster first so the batch leads with its
        // leg; a follower whose balance moved since the snapshot is dropped,
        // a broadcaster failure aborts before any follower is debited.
        let mut reserved: Vec<ReservedLeg> = Vec::new();

        if !pre_executed_leg {
            let balance = self
                .sessions
                .session(broadcaster)
                .await
                .map(|s| s.position(from_asset))
                .unwrap_or(Amount::ZERO);
            // The per-asset minimum only gates followers; the broadcaster
            // trades whatever it holds, as long as that is something.
            if balance.is_zero() {
                return Err(ExecuteError::BroadcasterEmptyBalance(broadcaster.clone()));
            }
            self.sessions
                .update_balance(broadcaster, from_asset, BalanceOp::Subtract, balance)
                .await?;
            reserved.push(ReservedLeg {
                proposal: TradeProposal {
                    trader: broadcaster.clone(),
                    from_asset,
                    to_asset,
                    amount: balance,
                    direction: intent.direction,
                    signature: intent.signature.clone(),
                    is_broadcaster: true,
                },
            });
        }

        for (follower, balance) in eligible {
            match self
                .sessions
                .update_balance(&follower, from_asset, BalanceOp::Subtract, balance)
                .await
            {
                Ok(_) => reserved.push(ReservedLeg {
                    proposal: TradeProposal {
                        trader: follower,
                        from_asset,
                        to_asset,
                        amount: balance,
                        direction: intent.direction,
                        signature: String::new(),
                        is_broadcaster: false,
                    },
                }),
                Err(e) => {
                    tracing::warn!(%follower, error = %e, "reservation failed, dropping follower");
                    self.metrics.record_follower_excluded();
                }
            }
        }

        if reserved.is_empty() {
            tracing::info!(%broadcaster, "nothing reserved, nothing to settle");
            return Ok(BroadcastOutcome::default());
        }

        let mut batch = TradeBatch::new();
        for leg in &reserved {
            batch.push(leg.proposal.clone());
        }
        debug_assert!(batch.is_well_ordered());

        match self.submitter.submit_batch(&batch).await {
            Ok(receipt) => {
                self.commit(&reserved, price, &receipt).await;
                let broadcaster_tx = if pre_executed_leg {
                    pre_executed
                } else {
                    Some(receipt.tx_hash.clone())
                };
                Ok(BroadcastOutcome {
                    broadcaster_executed: !pre_executed_leg,
                    followers_executed: reserved
                        .iter()
                        .filter(|l| !l.proposal.is_broadcaster)
                        .map(|l| l.proposal.trader.clone())
                        .collect(),
                    settlement: Some(receipt),
                    broadcaster_tx,
                })
            }
            Err(e) => {
                self.rollback(&reserved).await;
                Err(e.into())
            }
        }
    }

    fn exclude(&self, follower: &Address, reason: &str) {
        tracing::info!(%follower, reason, "excluding follower from batch");
        self.metrics.record_follower_excluded();
    }

    /// Credit destination balances, append trade logs, refresh PnL. The
    /// settlement already happened; problems here are logged, never
    /// propagated.
    async fn commit(&self, legs: &[ReservedLeg], price: ReferencePrice, receipt: &SettlementReceipt) {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        for leg in legs {
            let p = &leg.proposal;
            let amount_out = match price.convert(p.amount, p.to_asset) {
                Ok(out) => out,
                Err(e) => {
                    tracing::error!(trader = %p.trader, error = %e, "commit conversion failed");
                    continue;
                }
            };
            if let Err(e) = self
                .sessions
                .update_balance(&p.trader, p.to_asset, BalanceOp::Add, amount_out)
                .await
            {
                tracing::error!(trader = %p.trader, error = %e, "commit credit failed");
                continue;
            }
            let record = TradeRecord {
                timestamp: now,
                direction: p.direction,
                from_asset: p.from_asset,
                to_asset: p.to_asset,
                amount_in: p.amount,
                amount_out,
                price_micro: price.micro_per_eth(),
                tx_hash: receipt.tx_hash.clone(),
            };
            if let Err(e) = self.sessions.record_trade(&p.trader, record).await {
                tracing::error!(trader = %p.trader, error = %e, "trade log append failed");
            }
            if let Err(e) = self.sessions.update_pnl(&p.trader, price).await {
                tracing::warn!(trader = %p.trader, error = %e, "pnl refresh failed");
            }
        }
    }

    /// Restore every reserved source balance after a failed settlement.
    async fn rollback(&self, legs: &[ReservedLeg]) {
        for leg in legs {
            let p = &leg.proposal;
            if let Err(e) = self
                .sessions
                .update_balance(&p.trader, p.from_asset, BalanceOp::Add, p.amount)
                .await
            {
                tracing::error!(trader = %p.trader, error = %e, "rollback failed");
            }
        }
        tracing::warn!(legs = legs.len(), "settlement failed, balances restored");
    }

    /// Start copying a broadcaster. The session must already be active; the
    /// registry is only updated once the local state change succeeds.
    pub async fn register_follower(
        &self,
        user: &Address,
        broadcaster: &Address,
    ) -> Result<(), ExecuteError> {
        self.sessions.set_following(user, broadcaster.clone()).await?;
        if let Err(e) = self.registry.follow(user, broadcaster).await {
            let _ = self.sessions.clear_following(user).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn unregister_follower(&self, user: &Address) -> Result<(), ExecuteError> {
        self.registry.unfollow(user).await?;
        self.sessions.clear_following(user).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;
    use copybot_gateway::MockTransport;
    use copybot_sessions::SessionStore;
    use copybot_settlement::MockSubmitter;
    use copybot_types::{InboundMessage, TradeDirection, MICRO_PER_PYUSD, WEI_PER_ETH};

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    struct Fixture {
        sessions: Arc<SessionManager>,
        registry: Arc<StaticRegistry>,
        submitter: Arc<MockSubmitter>,
        executor: TradeExecutor,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(SessionManager::new(
            Arc::new(SessionStore::new()),
            MockTransport::new(),
            addr(99),
            15,
            Arc::new(MetricsCollector::new()),
        ));
        let registry = Arc::new(StaticRegistry::new());
        let submitter = MockSubmitter::new();
        let executor = TradeExecutor::new(
            sessions.clone(),
            registry.clone(),
            submitter.clone(),
            Arc::new(MetricsCollector::new()),
            Amount::new(MICRO_PER_PYUSD),
            Amount::new(333_333_333_333_333),
        );
        Fixture {
            sessions,
            registry,
            submitter,
            executor,
        }
    }

    async fn active_session(f: &Fixture, user: u8, pyusd: u128) {
        f.sessions
            .open_channel_for_user(addr(user), Amount::new(pyusd))
            .await
            .unwrap();
        f.sessions
            .handle_gateway_message(InboundMessage::SessionCreated {
                session_id: format!("sess-{user}"),
                participants: vec![addr(user)],
            })
            .await;
    }

    fn buy() -> TradeIntent {
        TradeIntent::new(TradeDirection::Buy)
    }

    #[tokio::test]
    async fn test_inactive_broadcaster_aborts_before_anything() {
        let f = fixture();
        f.sessions
            .open_channel_for_user(addr(1), Amount::new(10 * MICRO_PER_PYUSD))
            .await
            .unwrap();

        let price = ReferencePrice::from_quote(3000.0).unwrap();
        let err = f
            .executor
            .broadcast_trade(&addr(1), &buy(), price, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::BroadcasterInactive(_)));
        assert!(f.submitter.submitted_batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_excludes_below_minimum_and_clears_uniformly() {
        let f = fixture();
        active_session(&f, 1, 3000 * MICRO_PER_PYUSD).await; // broadcaster
        active_session(&f, 2, 1500 * MICRO_PER_PYUSD).await; // eligible
        active_session(&f, 3, MICRO_PER_PYUSD / 2).await; // below $1 minimum
        f.registry.follow(&addr(2), &addr(1)).await.unwrap();
        f.registry.follow(&addr(3), &addr(1)).await.unwrap();

        let price = ReferencePrice::from_quote(3000.0).unwrap();
        let outcome = f
            .executor
            .broadcast_trade(&addr(1), &buy(), price, None)
            .await
            .unwrap();

        assert!(outcome.broadcaster_executed);
        assert_eq!(outcome.followers_executed, vec![addr(2)]);
        assert_eq!(
            outcome.broadcaster_tx.as_deref(),
            outcome.settlement.as_ref().map(|r| r.tx_hash.as_str())
        );

        let batches = f.submitter.submitted_batches().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0].proposals()[0].is_broadcaster);

        // Both legs converted at the same price: full balances into ETH.
        let b = f.sessions.session(&addr(1)).await.unwrap();
        assert_eq!(b.position(Asset::Pyusd), Amount::ZERO);
        assert_eq!(b.position(Asset::Eth), Amount::new(WEI_PER_ETH));
        let fo = f.sessions.session(&addr(2)).await.unwrap();
        assert_eq!(fo.position(Asset::Eth), Amount::new(WEI_PER_ETH / 2));

        // Excluded follower untouched.
        let ex = f.sessions.session(&addr(3)).await.unwrap();
        assert_eq!(ex.position(Asset::Pyusd), Amount::new(MICRO_PER_PYUSD / 2));
        assert_eq!(ex.position(Asset::Eth), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_pre_executed_with_no_followers_is_noop() {
        let f = fixture();
        active_session(&f, 1, 3000 * MICRO_PER_PYUSD).await;

        let price = ReferencePrice::from_quote(3000.0).unwrap();
        let outcome = f
            .executor
            .broadcast_trade(&addr(1), &buy(), price, Some("0xfeed".into()))
            .await
            .unwrap();
        assert!(!outcome.broadcaster_executed);
        assert!(outcome.followers_executed.is_empty());
        assert!(outcome.settlement.is_none());
        assert_eq!(outcome.broadcaster_tx.as_deref(), Some("0xfeed"));
        assert!(f.submitter.submitted_batches().await.is_empty());

        // Broadcaster balance untouched.
        let b = f.sessions.session(&addr(1)).await.unwrap();
        assert_eq!(b.position(Asset::Pyusd), Amount::new(3000 * MICRO_PER_PYUSD));
    }

    #[tokio::test]
    async fn test_failed_settlement_rolls_back_everything() {
        let f = fixture();
        active_session(&f, 1, 3000 * MICRO_PER_PYUSD).await;
        active_session(&f, 2, 1500 * MICRO_PER_PYUSD).await;
        f.registry.follow(&addr(2), &addr(1)).await.unwrap();
        f.submitter
            .fail_with(SubmitError::Reverted("slippage".into()))
            .await;

        let price = ReferencePrice::from_quote(3000.0).unwrap();
        let err = f
            .executor
            .broadcast_trade(&addr(1), &buy(), price, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Settlement(SubmitError::Reverted(_))));

        // Balances exactly as before, no trades logged.
        for (user, micro) in [(1u8, 3000 * MICRO_PER_PYUSD), (2, 1500 * MICRO_PER_PYUSD)] {
            let s = f.sessions.session(&addr(user)).await.unwrap();
            assert_eq!(s.position(Asset::Pyusd), Amount::new(micro));
            assert_eq!(s.position(Asset::Eth), Amount::ZERO);
            assert!(s.trades.is_empty());
        }
    }

    #[tokio::test]
    async fn test_broadcaster_trades_below_follower_minimum() {
        let f = fixture();
        // Broadcaster holds half the follower minimum; still tradable.
        active_session(&f, 1, MICRO_PER_PYUSD / 2).await;
        active_session(&f, 2, 1500 * MICRO_PER_PYUSD).await;
        f.registry.follow(&addr(2), &addr(1)).await.unwrap();

        let price = ReferencePrice::from_quote(3000.0).unwrap();
        let outcome = f
            .executor
            .broadcast_trade(&addr(1), &buy(), price, None)
            .await
            .unwrap();
        assert!(outcome.broadcaster_executed);
        assert_eq!(outcome.followers_executed, vec![addr(2)]);

        let batches = f.submitter.submitted_batches().await;
        assert_eq!(batches[0].len(), 2);
        assert_eq!(
            batches[0].proposals()[0].amount,
            Amount::new(MICRO_PER_PYUSD / 2)
        );
    }

    #[tokio::test]
    async fn test_broadcaster_with_empty_balance_is_rejected() {
        let f = fixture();
        active_session(&f, 1, 1).await;
        active_session(&f, 2, 1500 * MICRO_PER_PYUSD).await;
        f.registry.follow(&addr(2), &addr(1)).await.unwrap();
        f.sessions
            .update_balance(&addr(1), Asset::Pyusd, BalanceOp::Subtract, Amount::new(1))
            .await
            .unwrap();

        let price = ReferencePrice::from_quote(3000.0).unwrap();
        let err = f
            .executor
            .broadcast_trade(&addr(1), &buy(), price, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::BroadcasterEmptyBalance(_)));
        assert!(f.submitter.submitted_batches().await.is_empty());

        // Follower never reserved.
        let fo = f.sessions.session(&addr(2)).await.unwrap();
        assert_eq!(fo.position(Asset::Pyusd), Amount::new(1500 * MICRO_PER_PYUSD));
    }

    #[tokio::test]
    async fn test_no_followers_is_noop_even_with_broadcaster_leg() {
        let f = fixture();
        active_session(&f, 1, 3000 * MICRO_PER_PYUSD).await;

        let price = ReferencePrice::from_quote(3000.0).unwrap();
        let outcome = f
            .executor
            .broadcast_trade(&addr(1), &buy(), price, None)
            .await
            .unwrap();
        assert!(!outcome.broadcaster_executed);
        assert!(outcome.settlement.is_none());
        assert!(f.submitter.submitted_batches().await.is_empty());

        let s = f.sessions.session(&addr(1)).await.unwrap();
        assert_eq!(s.position(Asset::Pyusd), Amount::new(3000 * MICRO_PER_PYUSD));
    }

    #[tokio::test]
    async fn test_successful_trade_appends_log() {
        let f = fixture();
        active_session(&f, 1, 3000 * MICRO_PER_PYUSD).await;
        active_session(&f, 2, 1500 * MICRO_PER_PYUSD).await;
        f.registry.follow(&addr(2), &addr(1)).await.unwrap();

        let price = ReferencePrice::from_quote(3000.0).unwrap();
        let outcome = f
            .executor
            .broadcast_trade(&addr(1), &buy(), price, None)
            .await
            .unwrap();
        assert!(outcome.settlement.is_some());

        let s = f.sessions.session(&addr(1)).await.unwrap();
        assert_eq!(s.trades.len(), 1);
        let record = &s.trades[0];
        assert_eq!(record.direction, TradeDirection::Buy);
        assert_eq!(record.amount_in, Amount::new(3000 * MICRO_PER_PYUSD));
        assert_eq!(record.amount_out, Amount::new(WEI_PER_ETH));
        assert_eq!(record.price_micro, 3000 * MICRO_PER_PYUSD);
    }

    #[tokio::test]
    async fn test_register_follower_requires_active_session() {
        let f = fixture();
        f.sessions
            .open_channel_for_user(addr(2), Amount::new(MICRO_PER_PYUSD))
            .await
            .unwrap();

        let err = f
            .executor
            .register_follower(&addr(2), &addr(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Session(SessionError::Inactive(_))));
        assert!(f.registry.followers_of(&addr(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_clears_both_sides() {
        let f = fixture();
        active_session(&f, 2, 2 * MICRO_PER_PYUSD).await;
        f.executor.register_follower(&addr(2), &addr(1)).await.unwrap();
        assert_eq!(
            f.registry.followers_of(&addr(1)).await.unwrap(),
            vec![addr(2)]
        );

        f.executor.unregister_follower(&addr(2)).await.unwrap();
        assert!(f.registry.followers_of(&addr(1)).await.unwrap().is_empty());
        assert!(f.sessions.session(&addr(2)).await.unwrap().following.is_none());
    }
}
