//! Durable WebSocket connection to the state-channel coordination network.

use copybot_config::GatewayConfig;
use copybot_metrics::MetricsCollector;
use copybot_types::{InboundMessage, OutboundMessage};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("not connected to coordination network")]
    NotConnected,

    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Connection lifecycle, operator-visible via `/health`.
///
/// `Exhausted` is terminal until an explicit [`Gateway::rearm`]; sends fail
/// in every state except `Connected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff { attempt: u32 },
    Exhausted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Backoff { attempt } => write!(f, "backoff({attempt})"),
            ConnectionState::Exhausted => f.write_str("exhausted"),
        }
    }
}

/// Client connection to the coordination network.
///
/// Inbound frames are decoded into [`InboundMessage`] and pushed into the
/// channel handed out by [`Gateway::new`]; undecodable frames are dropped.
pub struct Gateway {
    config: GatewayConfig,
    metrics: Arc<MetricsCollector>,
    state: RwLock<ConnectionState>,
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        metrics: Arc<MetricsCollector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            config,
            metrics,
            state: RwLock::new(ConnectionState::Disconnected),
            outbound: RwLock::new(None),
            inbound_tx,
        });
        (gateway, inbound_rx)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.read().await, ConnectionState::Connected)
    }

    /// Open the socket and resolve once the handshake completes. Handshake
    /// failure is an error; no reconnect is scheduled for a failed initial
    /// connect.
    pub async fn connect(self: &Arc<Self>) -> Result<(), GatewayError> {
        *self.state.write().await = ConnectionState::Connecting;
        match self.open_socket().await {
            Ok(()) => {
                tracing::info!(endpoint = %self.config.endpoint, "connected to coordination network");
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Send a message. Errors unless currently connected; there is no
    /// implicit queueing.
    pub async fn send(&self, message: &OutboundMessage) -> Result<(), GatewayError> {
        if !matches!(*self.state.read().await, ConnectionState::Connected) {
            return Err(GatewayError::NotConnected);
        }
        let text =
            serde_json::to_string(message).map_err(|e| GatewayError::Encode(e.to_string()))?;
        let outbound = self.outbound.read().await;
        outbound
            .as_ref()
            .ok_or(GatewayError::NotConnected)?
            .send(text)
            .map_err(|_| GatewayError::NotConnected)
    }

    /// Restart the reconnect loop after it exhausted its attempts. No-op in
    /// any other state.
    pub async fn rearm(self: &Arc<Self>) -> bool {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Exhausted {
            return false;
        }
        *state = ConnectionState::Disconnected;
        drop(state);
        tracing::info!("gateway re-armed by operator");
        self.clone().spawn_reconnect();
        true
    }

    async fn open_socket(self: &Arc<Self>) -> Result<(), GatewayError> {
        let (stream, _response) = connect_async(&self.config.endpoint)
            .await
            .map_err(|e| GatewayError::Handshake(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.write().await = Some(out_tx);
        *self.state.write().await = ConnectionState::Connected;

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let gateway = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<InboundMessage>(&text)
                    {
                        Ok(message) => {
                            if gateway.inbound_tx.send(message).is_err() {
                                return; // consumer gone, stop entirely
                            }
                        }
                        Err(e) => {
                            // Unhandled message kinds are ignored, not fatal.
                            tracing::debug!(error = %e, "dropping undecodable gateway frame");
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            gateway.handle_disconnect().await;
        });

        Ok(())
    }

    async fn handle_disconnect(self: Arc<Self>) {
        tracing::warn!("disconnected from coordination network");
        *self.outbound.write().await = None;
        *self.state.write().await = ConnectionState::Disconnected;
        self.spawn_reconnect();
    }

    /// Bounded fixed-delay reconnect. Exhausting the attempt budget parks
    /// the gateway in `Exhausted` until re-armed.
    fn spawn_reconnect(self: Arc<Self>) {
        tokio::spawn(async move {
            let delay = Duration::from_millis(self.config.reconnect_delay_ms);
            for attempt in 1..=self.config.max_reconnect_attempts {
                *self.state.write().await = ConnectionState::Backoff { attempt };
                self.metrics.record_gateway_reconnect();
                tokio::time::sleep(delay).await;

                tracing::info!(attempt, "reconnecting to coordination network");
                match self.open_socket().await {
                    Ok(()) => {
                        tracing::info!(attempt, "reconnected to coordination network");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    }
                }
            }
            *self.state.write().await = ConnectionState::Exhausted;
            tracing::error!(
                attempts = self.config.max_reconnect_attempts,
                "gateway reconnect attempts exhausted; manual rearm required"
            );
        });
    }

    #[cfg(test)]
    pub(crate) async fn force_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(endpoint: &str) -> GatewayConfig {
        GatewayConfig {
            endpoint: endpoint.to_string(),
            reconnect_delay_ms: 10,
            max_reconnect_attempts: 2,
        }
    }

    fn new_gateway(endpoint: &str) -> (Arc<Gateway>, mpsc::UnboundedReceiver<InboundMessage>) {
        Gateway::new(test_config(endpoint), Arc::new(MetricsCollector::new()))
    }

    #[tokio::test]
    async fn test_send_fails_when_disconnected() {
        let (gateway, _rx) = new_gateway("ws://127.0.0.1:1");
        let result = gateway.send(&OutboundMessage::Ping).await;
        assert!(matches!(result, Err(GatewayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_rejects_on_handshake_failure() {
        // Nothing listens on this port.
        let (gateway, _rx) = new_gateway("ws://127.0.0.1:9");
        let result = gateway.connect().await;
        assert!(matches!(result, Err(GatewayError::Handshake(_))));
        assert_eq!(gateway.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rearm_only_from_exhausted() {
        let (gateway, _rx) = new_gateway("ws://127.0.0.1:9");
        assert!(!gateway.rearm().await);

        gateway.force_state(ConnectionState::Exhausted).await;
        assert!(gateway.rearm().await);
        // The respawned loop runs against a dead endpoint and exhausts again.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.state().await, ConnectionState::Exhausted);
    }

    #[tokio::test]
    async fn test_connect_and_roundtrip_against_local_server() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Echo server: accept one socket, answer any frame with a
        // session_created message.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            if let Some(Ok(Message::Text(_))) = read.next().await {
                let reply = serde_json::json!({
                    "type": "session_created",
                    "session_id": "sess-1",
                    "participants": ["0x0000000000000000000000000000000000000001"],
                });
                write.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });

        let (gateway, mut rx) = new_gateway(&format!("ws://{addr}"));
        gateway.connect().await.unwrap();
        assert!(gateway.is_connected().await);

        gateway.send(&OutboundMessage::Ping).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(message, InboundMessage::SessionCreated { session_id, .. } if session_id == "sess-1"));
    }
}
