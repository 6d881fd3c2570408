//! HTTP surface: balances, trade history, follow management, broadcast
//! trigger, operational endpoints.
//!
//! Every response carries a `success` flag; validation failures answer 400
//! with `{success: false, error}` before any state is touched.

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use copybot_config::FeeSchedule;
use copybot_executor::{ExecuteError, FollowerRegistry, TradeExecutor};
use copybot_gateway::{ConnectionState, Gateway};
use copybot_ledger::LedgerClient;
use copybot_metrics::MetricsCollector;
use copybot_sessions::{SessionError, SessionManager};
use copybot_types::{Address, Amount, ReferencePrice, TradeDirection, TradeIntent};
use copybot_watcher::DepositWatcher;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Health-endpoint view of the gateway connection.
#[async_trait]
pub trait GatewayStatus: Send + Sync {
    async fn state_label(&self) -> String;
    async fn connected(&self) -> bool;
}

#[async_trait]
impl GatewayStatus for Gateway {
    async fn state_label(&self) -> String {
        self.state().await.to_string()
    }

    async fn connected(&self) -> bool {
        matches!(self.state().await, ConnectionState::Connected)
    }
}

pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub executor: Arc<TradeExecutor>,
    pub watcher: Arc<DepositWatcher>,
    pub ledger: Arc<dyn LedgerClient>,
    pub registry: Arc<dyn FollowerRegistry>,
    pub gateway: Arc<dyn GatewayStatus>,
    pub metrics: Arc<MetricsCollector>,
    pub fees: FeeSchedule,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/balance/:address", get(balance))
        .route("/trades/:address", get(trades))
        .route("/follow", post(follow))
        .route("/unfollow", post(unfollow))
        .route("/broadcast-trade", post(broadcast_trade))
        .route("/broadcaster/:address", get(broadcaster))
        .route("/register-deposit", post(register_deposit))
        .route("/fees", get(fees))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Bind and serve until the task is dropped.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(%host, port, "api listening");
    axum::serve(listener, router(state)).await
}

fn bad_request(error: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}

fn internal(error: impl Into<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}

fn parse_address(raw: &str) -> Result<Address, Response> {
    raw.parse().map_err(|_| bad_request(format!("invalid address: {raw}")))
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let body = json!({
        "status": "ok",
        "gateway": state.gateway.state_label().await,
        "gatewayConnected": state.gateway.connected().await,
        "ledgerConnected": state.ledger.is_connected().await,
        "trackedSessions": state.sessions.store().len().await,
    });
    Json(body).into_response()
}

#[derive(Deserialize)]
struct BalanceQuery {
    #[serde(rename = "ethPrice")]
    eth_price: Option<f64>,
}

/// Session balance when one exists, otherwise the raw on-chain deposit.
async fn balance(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> Response {
    let address = match parse_address(&raw) {
        Ok(a) => a,
        Err(r) => return r,
    };

    if let Some(quote) = query.eth_price {
        match ReferencePrice::from_quote(quote) {
            Ok(price) => {
                // Recompute is a side effect; a missing session just means
                // nothing to recompute.
                let _ = state.sessions.update_pnl(&address, price).await;
            }
            Err(e) => return bad_request(e.to_string()),
        }
    }

    if let Some(session) = state.sessions.session(&address).await {
        let positions: Value = session
            .positions
            .iter()
            .map(|(asset, amount)| (asset.symbol().to_string(), json!(amount.to_string())))
            .collect::<serde_json::Map<String, Value>>()
            .into();
        let body = json!({
            "success": true,
            "address": address,
            "source": "yellow",
            "status": session.status,
            "balances": positions,
            "pnl": session.pnl,
            "fees": session.fees,
            "following": session.following,
        });
        return Json(body).into_response();
    }

    // No session yet; answer with the vault's view.
    match state.ledger.deposit_of(&address).await {
        Ok(deposit) => Json(json!({
            "success": true,
            "address": address,
            "source": "l1",
            "balances": { "pyusd": deposit.to_string() },
        }))
        .into_response(),
        Err(e) => internal(e.to_string()),
    }
}

#[derive(Deserialize)]
struct TradesQuery {
    limit: Option<usize>,
}

async fn trades(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    Query(query): Query<TradesQuery>,
) -> Response {
    let address = match parse_address(&raw) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let Some(session) = state.sessions.session(&address).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "no session for address" })),
        )
            .into_response();
    };

    let limit = query.limit.unwrap_or(50);
    let start = session.trades.len().saturating_sub(limit);
    let recent = &session.trades[start..];
    Json(json!({
        "success": true,
        "address": address,
        "count": recent.len(),
        "trades": recent,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct FollowRequest {
    #[serde(rename = "userAddress")]
    user_address: String,
    #[serde(rename = "broadcasterAddress")]
    broadcaster_address: String,
}

async fn follow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FollowRequest>,
) -> Response {
    let user = match parse_address(&request.user_address) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let broadcaster = match parse_address(&request.broadcaster_address) {
        Ok(a) => a,
        Err(r) => return r,
    };

    match state.executor.register_follower(&user, &broadcaster).await {
        Ok(()) => Json(json!({ "success": true, "following": broadcaster })).into_response(),
        Err(ExecuteError::Session(SessionError::Inactive(_))) => {
            bad_request("session is not active yet")
        }
        Err(ExecuteError::Session(SessionError::NotFound(_))) => {
            bad_request("no session for user; deposit first")
        }
        Err(e) => internal(e.to_string()),
    }
}

async fn unfollow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FollowRequest>,
) -> Response {
    let user = match parse_address(&request.user_address) {
        Ok(a) => a,
        Err(r) => return r,
    };
    match state.executor.unregister_follower(&user).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(ExecuteError::Session(SessionError::NotFound(_))) => {
            bad_request("no session for user")
        }
        Err(e) => internal(e.to_string()),
    }
}

#[derive(Deserialize)]
struct TradePayload {
    #[serde(rename = "fromToken")]
    from_token: Option<String>,
    #[serde(rename = "toToken")]
    to_token: Option<String>,
    amount: Option<String>,
    signature: Option<String>,
    #[serde(rename = "type")]
    direction: Option<String>,
}

#[derive(Deserialize)]
struct BroadcastRequest {
    #[serde(rename = "broadcasterAddress")]
    broadcaster_address: String,
    trade: Option<TradePayload>,
    #[serde(rename = "ethPrice")]
    eth_price: Option<f64>,
    #[serde(rename = "preExecutedTxHash")]
    pre_executed_tx_hash: Option<String>,
}

async fn broadcast_trade(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastRequest>,
) -> Response {
    let broadcaster = match parse_address(&request.broadcaster_address) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let Some(trade) = request.trade else {
        return bad_request("trade is required");
    };
    for (field, value) in [
        ("trade.fromToken", &trade.from_token),
        ("trade.toToken", &trade.to_token),
        ("trade.amount", &trade.amount),
        ("trade.type", &trade.direction),
    ] {
        if value.as_deref().map_or(true, str::is_empty) {
            return bad_request(format!("{field} is required"));
        }
    }
    let direction = match trade.direction.as_deref() {
        Some("buy") => TradeDirection::Buy,
        Some("sell") => TradeDirection::Sell,
        other => return bad_request(format!("trade.type must be buy or sell, got {other:?}")),
    };
    let Some(quote) = request.eth_price else {
        return bad_request("ethPrice is required");
    };
    let price = match ReferencePrice::from_quote(quote) {
        Ok(p) => p,
        Err(e) => return bad_request(e.to_string()),
    };

    let intent = TradeIntent {
        direction,
        signature: trade.signature.unwrap_or_default(),
    };
    match state
        .executor
        .broadcast_trade(&broadcaster, &intent, price, request.pre_executed_tx_hash)
        .await
    {
        Ok(outcome) => Json(json!({
            "success": true,
            "broadcasterExecuted": outcome.broadcaster_executed,
            "broadcasterTx": outcome.broadcaster_tx,
            "followersExecuted": outcome.followers_executed.len(),
            "followers": outcome.followers_executed,
            "settlementTx": outcome.settlement.as_ref().map(|r| r.tx_hash.clone()),
            "gasUsed": outcome.settlement.as_ref().map(|r| r.gas_used),
        }))
        .into_response(),
        Err(e @ ExecuteError::BroadcasterInactive(_)) => bad_request(e.to_string()),
        Err(e @ ExecuteError::BroadcasterEmptyBalance(_)) => bad_request(e.to_string()),
        Err(e) => internal(e.to_string()),
    }
}

/// Follower count plus aggregate PnL over followers with active sessions.
async fn broadcaster(State(state): State<Arc<AppState>>, Path(raw): Path<String>) -> Response {
    let address = match parse_address(&raw) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let followers = match state.registry.followers_of(&address).await {
        Ok(f) => f,
        Err(e) => return internal(e.to_string()),
    };

    let mut total_pnl: i128 = 0;
    let mut active = 0usize;
    for follower in &followers {
        if let Some(session) = state.sessions.session(follower).await {
            if session.is_active() {
                active += 1;
                total_pnl += session.pnl.total;
            }
        }
    }

    Json(json!({
        "success": true,
        "broadcaster": address,
        "followerCount": followers.len(),
        "activeFollowers": active,
        "totalPnl": total_pnl.to_string(),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct RegisterDepositRequest {
    address: String,
    amount: String,
    #[serde(rename = "txHash")]
    tx_hash: String,
}

async fn register_deposit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterDepositRequest>,
) -> Response {
    let user = match parse_address(&request.address) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let amount: Amount = match request.amount.parse() {
        Ok(a) => a,
        Err(_) => return bad_request(format!("invalid amount: {}", request.amount)),
    };
    if request.tx_hash.is_empty() {
        return bad_request("txHash is required");
    }

    match state
        .watcher
        .register_manual_deposit(user, amount, &request.tx_hash)
        .await
    {
        Ok(processed) => Json(json!({ "success": true, "processed": processed })).into_response(),
        Err(e) => internal(e.to_string()),
    }
}

async fn fees(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "success": true,
        "fees": {
            "deposit": state.fees.deposit,
            "withdrawal": state.fees.withdrawal,
            "trade": state.fees.trade,
        },
        "currency": "PYUSD",
    }))
    .into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.export() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => internal(e.to_string()),
    }
}
