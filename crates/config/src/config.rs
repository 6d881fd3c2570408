//! Typed configuration for the copybot relayer.

use copybot_types::Address;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Environment and logging.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Ledger RPC and contract addresses.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// State-channel coordination network connection.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// HTTP API surface.
    #[serde(default)]
    pub api: ApiConfig,

    /// Copy-trading parameters.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Follower registry service.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Static user-facing fee schedule.
    #[serde(default)]
    pub fees: FeeSchedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub environment: Environment,

    /// Log filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Mainnet,
    #[default]
    Testnet,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the underlying ledger.
    #[serde(default)]
    pub rpc_url: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Collateral vault emitting Deposit/Withdrawal events.
    #[serde(default)]
    pub vault_address: String,

    /// Batch-execution contract exposing `executeBatch`.
    #[serde(default)]
    pub batch_executor_address: String,

    /// Token contract addresses, forwarded into settlement calldata.
    #[serde(default)]
    pub pyusd_address: String,
    #[serde(default)]
    pub eth_address: String,

    /// Relayer account that pays for and sends settlement transactions.
    #[serde(default)]
    pub relayer_address: String,

    /// Polling cadence for the live event loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Historical window replayed at startup to catch missed deposits.
    #[serde(default = "default_backfill_blocks")]
    pub backfill_blocks: u64,

    /// Receipt polling cadence and cap while awaiting settlement
    /// confirmation.
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,

    /// Gas headroom applied on top of the node estimate, in percent.
    #[serde(default = "default_gas_headroom_pct")]
    pub gas_headroom_pct: u64,

    /// Gas limit used when estimation fails.
    #[serde(default = "default_fallback_gas_limit")]
    pub fallback_gas_limit: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            chain_id: default_chain_id(),
            vault_address: String::new(),
            batch_executor_address: String::new(),
            pyusd_address: String::new(),
            eth_address: String::new(),
            relayer_address: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            backfill_blocks: default_backfill_blocks(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            receipt_timeout_ms: default_receipt_timeout_ms(),
            gas_headroom_pct: default_gas_headroom_pct(),
            fallback_gas_limit: default_fallback_gas_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket endpoint of the coordination network.
    #[serde(default)]
    pub endpoint: String,

    /// Fixed delay between reconnect attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Attempts before the connection state goes to `Exhausted`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Broadcaster revenue share of follower profits, percent.
    #[serde(default = "default_fee_percent")]
    pub fee_percent: u64,

    /// Minimum source-asset balances for batch inclusion (roughly $1).
    #[serde(default = "default_min_trade_pyusd")]
    pub min_trade_pyusd: u128,
    #[serde(default = "default_min_trade_eth")]
    pub min_trade_eth: u128,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            fee_percent: default_fee_percent(),
            min_trade_pyusd: default_min_trade_pyusd(),
            min_trade_eth: default_min_trade_eth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the follower registry service.
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            timeout_ms: default_registry_timeout_ms(),
        }
    }
}

/// Flat per-operation fees shown on `/fees`, whole PYUSD as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    #[serde(default = "default_deposit_fee")]
    pub deposit: String,
    #[serde(default = "default_withdrawal_fee")]
    pub withdrawal: String,
    #[serde(default = "default_trade_fee")]
    pub trade: String,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            deposit: default_deposit_fee(),
            withdrawal: default_withdrawal_fee(),
            trade: default_trade_fee(),
        }
    }
}

impl AppConfig {
    /// Reject configurations the relayer cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.rpc_url.is_empty() {
            return Err(ConfigError::Validation("ledger.rpc_url is required".into()));
        }
        if self.gateway.endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "gateway.endpoint is required".into(),
            ));
        }
        for (field, value) in [
            ("ledger.vault_address", &self.ledger.vault_address),
            (
                "ledger.batch_executor_address",
                &self.ledger.batch_executor_address,
            ),
            ("ledger.relayer_address", &self.ledger.relayer_address),
            ("ledger.pyusd_address", &self.ledger.pyusd_address),
            ("ledger.eth_address", &self.ledger.eth_address),
        ] {
            value.parse::<Address>().map_err(|e| {
                ConfigError::Validation(format!("{field} is not a valid address: {e}"))
            })?;
        }
        if self.broadcast.fee_percent > 100 {
            return Err(ConfigError::Validation(
                "broadcast.fee_percent must be <= 100".into(),
            ));
        }
        if self.gateway.max_reconnect_attempts == 0 {
            return Err(ConfigError::Validation(
                "gateway.max_reconnect_attempts must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn relayer_address(&self) -> Address {
        // validate() has already checked this parses.
        self.ledger
            .relayer_address
            .parse()
            .unwrap_or_else(|_| "0x0000000000000000000000000000000000000000".parse().unwrap())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chain_id() -> u64 {
    8888
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_backfill_blocks() -> u64 {
    1_000
}

fn default_receipt_poll_interval_ms() -> u64 {
    1_000
}

fn default_receipt_timeout_ms() -> u64 {
    60_000
}

fn default_gas_headroom_pct() -> u64 {
    20
}

fn default_fallback_gas_limit() -> u64 {
    20_000_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

fn default_fee_percent() -> u64 {
    15
}

fn default_min_trade_pyusd() -> u128 {
    1_000_000 // 1 PYUSD
}

fn default_min_trade_eth() -> u128 {
    333_333_333_333_333 // ~$1 of ETH at $3000
}

fn default_registry_url() -> String {
    "http://localhost:3002".to_string()
}

fn default_registry_timeout_ms() -> u64 {
    5_000
}

fn default_deposit_fee() -> String {
    "0.50".to_string()
}

fn default_withdrawal_fee() -> String {
    "0.50".to_string()
}

fn default_trade_fee() -> String {
    "1.50".to_string()
}
