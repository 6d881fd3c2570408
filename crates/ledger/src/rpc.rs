//! JSON-RPC plumbing for the underlying EVM-style ledger.

use async_trait::async_trait;
use copybot_types::{Address, Amount, DepositEvent, VaultEvent};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::client::{LedgerClient, LedgerError};

/// keccak256("Deposit(address,uint256,uint256)")
pub const DEPOSIT_TOPIC: &str =
    "0x90890809c654f11d6e72a28fa60149770a0d11ec6c92319d6ceb2bb0a4ea1a15";

/// keccak256("Withdrawal(address,uint256,uint256)")
pub const WITHDRAWAL_TOPIC: &str =
    "0xdf273cb619d95419a9cd0ec88123a0538c85064229baa6363788f743fff90deb";

/// Selector of `deposits(address)` on the vault.
pub const DEPOSITS_SELECTOR: &str = "fc7e286d";

/// Minimal JSON-RPC 2.0 client over HTTP.
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::ConnectionFailed(e.to_string()))?;

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| LedgerError::InvalidResponse(format!("{method}: empty result")))
    }
}

/// A log entry as returned by `eth_getLogs` / receipt queries.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionIndex")]
    pub tx_index: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct RawReceipt {
    logs: Vec<RawLog>,
}

pub fn parse_hex_u64(s: &str) -> Result<u64, LedgerError> {
    let body = s.trim_start_matches("0x");
    u64::from_str_radix(body, 16)
        .map_err(|_| LedgerError::InvalidResponse(format!("bad hex quantity: {s}")))
}

pub fn parse_hex_u128(s: &str) -> Result<u128, LedgerError> {
    let body = s.trim_start_matches("0x");
    // Quantities larger than 128 bits do not occur for vault amounts; take
    // the low 32 nibbles if a node pads the word.
    let body = if body.len() > 32 {
        let (head, tail) = body.split_at(body.len() - 32);
        if head.chars().any(|c| c != '0') {
            return Err(LedgerError::InvalidResponse(format!(
                "quantity exceeds 128 bits: {s}"
            )));
        }
        tail
    } else {
        body
    };
    u128::from_str_radix(body, 16)
        .map_err(|_| LedgerError::InvalidResponse(format!("bad hex quantity: {s}")))
}

pub fn to_hex(value: u64) -> String {
    format!("0x{value:x}")
}

/// Decode one vault log into a typed event. Logs with foreign topics yield
/// `None`.
pub fn parse_vault_log(log: &RawLog) -> Result<Option<VaultEvent>, LedgerError> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };

    let is_deposit = topic0.eq_ignore_ascii_case(DEPOSIT_TOPIC);
    let is_withdrawal = topic0.eq_ignore_ascii_case(WITHDRAWAL_TOPIC);
    if !is_deposit && !is_withdrawal {
        return Ok(None);
    }

    let user_topic = log
        .topics
        .get(1)
        .ok_or_else(|| LedgerError::InvalidResponse("vault log missing user topic".into()))?;
    let user: Address = format!("0x{}", &user_topic.trim_start_matches("0x")[24..])
        .parse()
        .map_err(|e| LedgerError::InvalidResponse(format!("bad user address in log: {e}")))?;

    let data = log.data.trim_start_matches("0x");
    if data.len() < 128 {
        return Err(LedgerError::InvalidResponse(
            "vault log data shorter than two words".into(),
        ));
    }
    let amount = Amount::new(parse_hex_u128(&data[..64])?);
    let timestamp = parse_hex_u128(&data[64..128])? as u64;

    if is_deposit {
        Ok(Some(VaultEvent::Deposit(DepositEvent {
            user,
            amount,
            block_number: parse_hex_u64(&log.block_number)?,
            tx_index: parse_hex_u64(&log.tx_index)? as u32,
            timestamp,
            tx_hash: log.tx_hash.clone(),
        })))
    } else {
        Ok(Some(VaultEvent::Withdrawal {
            user,
            amount,
            timestamp,
        }))
    }
}

/// `LedgerClient` backed by JSON-RPC. Live subscription is a poll loop over
/// `eth_getLogs`; dedup downstream makes redelivery harmless.
pub struct RpcLedgerClient {
    rpc: Arc<JsonRpcClient>,
    vault: Address,
    poll_interval: Duration,
}

impl RpcLedgerClient {
    pub fn new(rpc_url: &str, vault: Address, poll_interval: Duration) -> Self {
        Self {
            rpc: Arc::new(JsonRpcClient::new(rpc_url)),
            vault,
            poll_interval,
        }
    }

    pub fn rpc(&self) -> Arc<JsonRpcClient> {
        self.rpc.clone()
    }

    async fn get_vault_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, LedgerError> {
        self.rpc
            .call(
                "eth_getLogs",
                json!([{
                    "address": self.vault.as_str(),
                    "fromBlock": to_hex(from),
                    "toBlock": to_hex(to),
                    "topics": [[DEPOSIT_TOPIC, WITHDRAWAL_TOPIC]],
                }]),
            )
            .await
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn latest_block(&self) -> Result<u64, LedgerError> {
        let hex: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&hex)
    }

    async fn deposit_events(&self, from: u64, to: u64) -> Result<Vec<DepositEvent>, LedgerError> {
        let logs = self.get_vault_logs(from, to).await?;
        let mut deposits = Vec::new();
        for log in &logs {
            if let Some(VaultEvent::Deposit(d)) = parse_vault_log(log)? {
                deposits.push(d);
            }
        }
        Ok(deposits)
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<VaultEvent>, LedgerError> {
        let (tx, rx) = mpsc::channel(256);
        let rpc = self.rpc.clone();
        let vault = self.vault.clone();
        let interval = self.poll_interval;
        let mut last_seen = self.latest_block().await?;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let latest: Result<String, _> = rpc.call("eth_blockNumber", json!([])).await;
                let latest = match latest.and_then(|h| parse_hex_u64(&h)) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(error = %e, "event poll: block number query failed");
                        continue;
                    }
                };
                if latest <= last_seen {
                    continue;
                }

                let logs: Result<Vec<RawLog>, _> = rpc
                    .call(
                        "eth_getLogs",
                        json!([{
                            "address": vault.as_str(),
                            "fromBlock": to_hex(last_seen + 1),
                            "toBlock": to_hex(latest),
                            "topics": [[DEPOSIT_TOPIC, WITHDRAWAL_TOPIC]],
                        }]),
                    )
                    .await;
                match logs {
                    Ok(logs) => {
                        last_seen = latest;
                        for log in &logs {
                            match parse_vault_log(log) {
                                Ok(Some(event)) => {
                                    if tx.send(event).await.is_err() {
                                        return; // subscriber dropped
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    tracing::warn!(error = %e, "event poll: skipping undecodable log");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "event poll: log query failed");
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn deposit_of(&self, user: &Address) -> Result<Amount, LedgerError> {
        let calldata = format!("0x{}{:0>64}", DEPOSITS_SELECTOR, &user.as_str()[2..]);
        let result: String = self
            .rpc
            .call(
                "eth_call",
                json!([{"to": self.vault.as_str(), "data": calldata}, "latest"]),
            )
            .await?;
        Ok(Amount::new(parse_hex_u128(&result)?))
    }

    async fn transaction_event(
        &self,
        tx_hash: &str,
    ) -> Result<Option<DepositEvent>, LedgerError> {
        let receipt: Option<RawReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await
            .map(Some)
            .or_else(|e| match e {
                // Nodes answer a null result for unknown hashes.
                LedgerError::InvalidResponse(_) => Ok(None),
                other => Err(other),
            })?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        for log in &receipt.logs {
            if !log.address.eq_ignore_ascii_case(self.vault.as_str()) {
                continue;
            }
            if let Some(VaultEvent::Deposit(d)) = parse_vault_log(log)? {
                return Ok(Some(d));
            }
        }
        Ok(None)
    }

    async fn is_connected(&self) -> bool {
        self.latest_block().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit_log(user: &str, amount: u128, block: u64) -> RawLog {
        RawLog {
            address: "0x0000000000000000000000000000000000000010".into(),
            topics: vec![
                DEPOSIT_TOPIC.into(),
                format!("0x{:0>64}", &user[2..]),
            ],
            data: format!("0x{amount:064x}{:064x}", 1_700_000_000u64),
            block_number: to_hex(block),
            tx_index: "0x0".into(),
            tx_hash: "0xabc".into(),
        }
    }

    #[test]
    fn test_parse_deposit_log() {
        let log = deposit_log("0x00000000000000000000000000000000000000aa", 1_000_000, 10);
        let event = parse_vault_log(&log).unwrap().unwrap();
        match event {
            VaultEvent::Deposit(d) => {
                assert_eq!(d.user.as_str(), "0x00000000000000000000000000000000000000aa");
                assert_eq!(d.amount, Amount::new(1_000_000));
                assert_eq!(d.block_number, 10);
                assert_eq!(d.tx_index, 0);
                assert_eq!(d.timestamp, 1_700_000_000);
            }
            other => panic!("expected deposit, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_withdrawal_log() {
        let mut log = deposit_log("0x00000000000000000000000000000000000000aa", 500, 12);
        log.topics[0] = WITHDRAWAL_TOPIC.into();
        let event = parse_vault_log(&log).unwrap().unwrap();
        assert!(matches!(
            event,
            VaultEvent::Withdrawal { amount, .. } if amount == Amount::new(500)
        ));
    }

    #[test]
    fn test_foreign_topic_ignored() {
        let mut log = deposit_log("0x00000000000000000000000000000000000000aa", 500, 12);
        log.topics[0] = format!("0x{:064x}", 1);
        assert!(parse_vault_log(&log).unwrap().is_none());
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(parse_hex_u64("0x2a").unwrap(), 42);
        assert_eq!(parse_hex_u128(&format!("0x{:064x}", 7u8)).unwrap(), 7);
        assert!(parse_hex_u64("0xzz").is_err());
    }
}
