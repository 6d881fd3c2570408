//! Seam between the session layer and the coordination network.

use crate::connection::{Gateway, GatewayError};
use async_trait::async_trait;
use copybot_types::OutboundMessage;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outbound half of the coordination network, mockable for tests.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), GatewayError>;
    async fn is_connected(&self) -> bool;
}

#[async_trait]
impl ChannelTransport for Gateway {
    async fn send(&self, message: &OutboundMessage) -> Result<(), GatewayError> {
        Gateway::send(self, message).await
    }

    async fn is_connected(&self) -> bool {
        Gateway::is_connected(self).await
    }
}

/// In-memory transport that records what was sent.
pub struct MockTransport {
    connected: Mutex<bool>,
    fail_sends: Mutex<bool>,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: Mutex::new(true),
            fail_sends: Mutex::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub async fn set_connected(&self, connected: bool) {
        *self.connected.lock().await = connected;
    }

    pub async fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().await = fail;
    }

    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), GatewayError> {
        if !*self.connected.lock().await || *self.fail_sends.lock().await {
            return Err(GatewayError::NotConnected);
        }
        self.sent.lock().await.push(message.clone());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.connected.lock().await
    }
}
