//! Settlement submission over ledger JSON-RPC.

use crate::encode::{encode_batch_call, TokenMap};
use async_trait::async_trait;
use copybot_ledger::{rpc::parse_hex_u64, rpc::to_hex, JsonRpcClient, LedgerError};
use copybot_metrics::MetricsCollector;
use copybot_types::{Address, TradeBatch};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Why a settlement failed, classified from node error text. Diagnostics
/// only; the relayer never retries a failed batch on its own.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("relayer account cannot cover gas")]
    InsufficientFunds,

    #[error("transaction nonce conflict")]
    NonceConflict,

    #[error("batch reverted on-ledger: {0}")]
    Reverted(String),

    #[error("no receipt within {0:?}")]
    Timeout(Duration),

    #[error("rpc failure: {0}")]
    Rpc(String),

    #[error("refusing to submit an empty batch")]
    EmptyBatch,
}

impl SubmitError {
    /// Metric label for the failure cause.
    pub fn cause(&self) -> &'static str {
        match self {
            SubmitError::InsufficientFunds => "insufficient_funds",
            SubmitError::NonceConflict => "nonce_conflict",
            SubmitError::Reverted(_) => "reverted",
            SubmitError::Timeout(_) => "timeout",
            SubmitError::Rpc(_) => "rpc",
            SubmitError::EmptyBatch => "empty_batch",
        }
    }
}

/// Classify a node-side send failure from its message text.
fn classify_send_error(error: &LedgerError) -> SubmitError {
    let text = error.to_string().to_ascii_lowercase();
    if text.contains("insufficient funds") {
        SubmitError::InsufficientFunds
    } else if text.contains("nonce") {
        SubmitError::NonceConflict
    } else if text.contains("revert") {
        SubmitError::Reverted(error.to_string())
    } else {
        SubmitError::Rpc(error.to_string())
    }
}

/// Outcome of a confirmed settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub tx_hash: String,
    pub gas_used: u64,
    pub trade_count: usize,
}

/// Submits a settlement batch and waits for confirmation.
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    async fn submit_batch(&self, batch: &TradeBatch) -> Result<SettlementReceipt, SubmitError>;
}

pub struct RpcBatchSubmitter {
    rpc: Arc<JsonRpcClient>,
    executor: Address,
    relayer: Address,
    tokens: TokenMap,
    gas_headroom_pct: u64,
    fallback_gas_limit: u64,
    receipt_poll_interval: Duration,
    receipt_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl RpcBatchSubmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: Arc<JsonRpcClient>,
        executor: Address,
        relayer: Address,
        tokens: TokenMap,
        gas_headroom_pct: u64,
        fallback_gas_limit: u64,
        receipt_poll_interval: Duration,
        receipt_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            rpc,
            executor,
            relayer,
            tokens,
            gas_headroom_pct,
            fallback_gas_limit,
            receipt_poll_interval,
            receipt_timeout,
            metrics,
        }
    }

    /// Node estimate with headroom, or the fixed fallback when the node
    /// refuses to estimate.
    async fn gas_limit(&self, calldata_hex: &str) -> u64 {
        let params = json!([{
            "from": self.relayer.as_str(),
            "to": self.executor.as_str(),
            "data": calldata_hex,
        }]);
        match self.rpc.call::<String>("eth_estimateGas", params).await {
            Ok(estimate) => match parse_hex_u64(&estimate) {
                Ok(gas) => gas * (100 + self.gas_headroom_pct) / 100,
                Err(_) => self.fallback_gas_limit,
            },
            Err(e) => {
                tracing::warn!(error = %e, fallback = self.fallback_gas_limit, "gas estimation failed");
                self.fallback_gas_limit
            }
        }
    }

    async fn await_receipt(&self, tx_hash: &str) -> Result<u64, SubmitError> {
        let deadline = tokio::time::Instant::now() + self.receipt_timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(SubmitError::Timeout(self.receipt_timeout));
            }
            tokio::time::sleep(self.receipt_poll_interval).await;

            // A null result means the transaction is still pending.
            let receipt: serde_json::Value = match self
                .rpc
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(receipt) => receipt,
                Err(LedgerError::InvalidResponse(_)) => continue,
                Err(e) => return Err(SubmitError::Rpc(e.to_string())),
            };

            let status = receipt
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("0x0");
            let gas_used = receipt
                .get("gasUsed")
                .and_then(|g| g.as_str())
                .and_then(|g| parse_hex_u64(g).ok())
                .unwrap_or(0);

            if status == "0x1" {
                return Ok(gas_used);
            }
            return Err(SubmitError::Reverted(format!(
                "status {status} in {tx_hash}"
            )));
        }
    }
}

#[async_trait]
impl BatchSubmitter for RpcBatchSubmitter {
    async fn submit_batch(&self, batch: &TradeBatch) -> Result<SettlementReceipt, SubmitError> {
        if batch.is_empty() {
            return Err(SubmitError::EmptyBatch);
        }

        let calldata = encode_batch_call(batch, &self.tokens);
        let calldata_hex = format!("0x{}", hex::encode(&calldata));
        let gas = self.gas_limit(&calldata_hex).await;

        tracing::info!(
            trades = batch.len(),
            gas,
            executor = %self.executor,
            "submitting settlement batch"
        );
        let params = json!([{
            "from": self.relayer.as_str(),
            "to": self.executor.as_str(),
            "gas": to_hex(gas),
            "data": calldata_hex,
        }]);
        let tx_hash: String = self
            .rpc
            .call("eth_sendTransaction", params)
            .await
            .map_err(|e| {
                let classified = classify_send_error(&e);
                self.metrics.record_settlement_failure(classified.cause());
                classified
            })?;

        match self.await_receipt(&tx_hash).await {
            Ok(gas_used) => {
                self.metrics.record_batch_submitted(batch.len(), gas_used);
                tracing::info!(%tx_hash, gas_used, "settlement confirmed");
                Ok(SettlementReceipt {
                    tx_hash,
                    gas_used,
                    trade_count: batch.len(),
                })
            }
            Err(e) => {
                self.metrics.record_settlement_failure(e.cause());
                tracing::error!(%tx_hash, error = %e, "settlement failed");
                Err(e)
            }
        }
    }
}

/// Scripted submitter for executor tests.
pub struct MockSubmitter {
    fail_with: Mutex<Option<SubmitError>>,
    submitted: Mutex<Vec<TradeBatch>>,
}

impl MockSubmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_with: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
        })
    }

    /// Make the next submissions fail with the given error.
    pub async fn fail_with(&self, error: SubmitError) {
        *self.fail_with.lock().await = Some(error);
    }

    pub async fn clear_failure(&self) {
        *self.fail_with.lock().await = None;
    }

    pub async fn submitted_batches(&self) -> Vec<TradeBatch> {
        self.submitted.lock().await.clone()
    }
}

#[async_trait]
impl BatchSubmitter for MockSubmitter {
    async fn submit_batch(&self, batch: &TradeBatch) -> Result<SettlementReceipt, SubmitError> {
        if batch.is_empty() {
            return Err(SubmitError::EmptyBatch);
        }
        if let Some(error) = self.fail_with.lock().await.take() {
            return Err(error);
        }
        self.submitted.lock().await.push(batch.clone());
        Ok(SettlementReceipt {
            tx_hash: format!("0xmock{:04x}", self.submitted.lock().await.len()),
            gas_used: 21_000,
            trade_count: batch.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copybot_types::{Amount, Asset, TradeDirection, TradeProposal};

    fn batch_of(n: usize) -> TradeBatch {
        let mut batch = TradeBatch::new();
        for i in 0..n {
            batch.push(TradeProposal {
                trader: format!("0x{:040x}", i + 1).parse().unwrap(),
                from_asset: Asset::Pyusd,
                to_asset: Asset::Eth,
                amount: Amount::new(1_000_000),
                direction: TradeDirection::Buy,
                signature: String::new(),
                is_broadcaster: i == 0,
            });
        }
        batch
    }

    #[test]
    fn test_classification_from_node_text() {
        let e = LedgerError::Rpc {
            code: -32000,
            message: "insufficient funds for gas * price + value".into(),
        };
        assert!(matches!(classify_send_error(&e), SubmitError::InsufficientFunds));

        let e = LedgerError::Rpc {
            code: -32000,
            message: "nonce too low".into(),
        };
        assert!(matches!(classify_send_error(&e), SubmitError::NonceConflict));

        let e = LedgerError::Rpc {
            code: 3,
            message: "execution reverted: slippage".into(),
        };
        assert!(matches!(classify_send_error(&e), SubmitError::Reverted(_)));

        let e = LedgerError::ConnectionFailed("refused".into());
        assert!(matches!(classify_send_error(&e), SubmitError::Rpc(_)));
    }

    #[tokio::test]
    async fn test_mock_rejects_empty_batch() {
        let mock = MockSubmitter::new();
        let err = mock.submit_batch(&TradeBatch::new()).await.unwrap_err();
        assert!(matches!(err, SubmitError::EmptyBatch));
    }

    #[tokio::test]
    async fn test_mock_scripted_failure_then_success() {
        let mock = MockSubmitter::new();
        mock.fail_with(SubmitError::Reverted("boom".into())).await;

        let err = mock.submit_batch(&batch_of(2)).await.unwrap_err();
        assert!(matches!(err, SubmitError::Reverted(_)));
        assert!(mock.submitted_batches().await.is_empty());

        let receipt = mock.submit_batch(&batch_of(2)).await.unwrap();
        assert_eq!(receipt.trade_count, 2);
        assert_eq!(mock.submitted_batches().await.len(), 1);
    }
}
