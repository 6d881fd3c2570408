//! Copybot relayer entry point: wires the vault watcher, session manager,
//! coordination-network gateway, trade executor and HTTP API together.

use anyhow::Context;
use clap::Parser;
use copybot_api::{AppState, GatewayStatus};
use copybot_config::{AppConfig, ConfigLoader};
use copybot_executor::{HttpFollowerRegistry, TradeExecutor};
use copybot_gateway::Gateway;
use copybot_ledger::{LedgerClient, RpcLedgerClient};
use copybot_metrics::MetricsCollector;
use copybot_sessions::{SessionManager, SessionStore};
use copybot_settlement::{RpcBatchSubmitter, TokenMap};
use copybot_types::{Address, Amount};
use copybot_watcher::DepositWatcher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "copybot-relayer", about = "Copy-trading relayer core")]
struct Args {
    /// Path to a TOML config file; environment variables with the COPYBOT
    /// prefix override it.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.network.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_addr(raw: &str, field: &str) -> anyhow::Result<Address> {
    raw.parse()
        .map_err(|e| anyhow::anyhow!("{field}: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ConfigLoader::from_file_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ConfigLoader::from_env().context("loading config from environment")?,
    };
    config.validate().context("invalid configuration")?;
    init_tracing(&config);

    let metrics = Arc::new(MetricsCollector::new());
    let relayer = config.relayer_address();
    let vault = parse_addr(&config.ledger.vault_address, "ledger.vault_address")?;
    let executor_contract = parse_addr(
        &config.ledger.batch_executor_address,
        "ledger.batch_executor_address",
    )?;
    let tokens = TokenMap {
        pyusd: parse_addr(&config.ledger.pyusd_address, "ledger.pyusd_address")?,
        eth: parse_addr(&config.ledger.eth_address, "ledger.eth_address")?,
    };

    tracing::info!(
        environment = ?config.network.environment,
        %relayer,
        "starting copybot relayer"
    );

    // Coordination network. A failed initial handshake is fatal; later
    // disconnects go through the bounded reconnect loop.
    let (gateway, mut inbound) = Gateway::new(config.gateway.clone(), metrics.clone());
    gateway
        .connect()
        .await
        .context("connecting to coordination network")?;

    let sessions = Arc::new(SessionManager::new(
        Arc::new(SessionStore::new()),
        gateway.clone(),
        relayer.clone(),
        config.broadcast.fee_percent as u8,
        metrics.clone(),
    ));

    // Pump confirmations from the gateway into the session manager.
    {
        let sessions = sessions.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                sessions.handle_gateway_message(message).await;
            }
        });
    }

    let rpc_ledger = Arc::new(RpcLedgerClient::new(
        &config.ledger.rpc_url,
        vault,
        Duration::from_millis(config.ledger.poll_interval_ms),
    ));
    let ledger: Arc<dyn LedgerClient> = rpc_ledger.clone();

    let watcher = Arc::new(DepositWatcher::new(
        ledger.clone(),
        sessions.clone(),
        metrics.clone(),
        config.ledger.backfill_blocks,
    ));
    watcher.initialize().await.context("ledger unreachable")?;
    watcher
        .watch_deposits()
        .await
        .context("starting deposit watcher")?;

    let registry = Arc::new(HttpFollowerRegistry::new(
        config.registry.base_url.clone(),
        Duration::from_millis(config.registry.timeout_ms),
    ));
    let submitter = Arc::new(RpcBatchSubmitter::new(
        rpc_ledger.rpc(),
        executor_contract,
        relayer,
        tokens,
        config.ledger.gas_headroom_pct,
        config.ledger.fallback_gas_limit,
        Duration::from_millis(config.ledger.receipt_poll_interval_ms),
        Duration::from_millis(config.ledger.receipt_timeout_ms),
        metrics.clone(),
    ));
    let executor = Arc::new(TradeExecutor::new(
        sessions.clone(),
        registry.clone(),
        submitter,
        metrics.clone(),
        Amount::new(config.broadcast.min_trade_pyusd),
        Amount::new(config.broadcast.min_trade_eth),
    ));

    let state = Arc::new(AppState {
        sessions,
        executor,
        watcher: watcher.clone(),
        ledger,
        registry,
        gateway: gateway.clone() as Arc<dyn GatewayStatus>,
        metrics,
        fees: config.fees.clone(),
    });

    let host = config.api.host.clone();
    let port = config.api.port;
    tokio::select! {
        result = copybot_api::serve(state, &host, port) => {
            result.context("api server exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    watcher.stop_watching().await;
    Ok(())
}
