use crate::{Address, Amount, Asset};
use serde::{Deserialize, Serialize};

/// Two-party application definition proposed to the coordination network:
/// user and relayer with equal weight, full quorum, no challenge period.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    pub protocol: String,
    pub participants: Vec<Address>,
    pub weights: Vec<u32>,
    pub quorum: u32,
    pub challenge: u32,
    pub nonce: u64,
}

impl ChannelDefinition {
    pub fn two_party(user: Address, relayer: Address, nonce: u64) -> Self {
        Self {
            protocol: crate::CHANNEL_PROTOCOL.to_string(),
            participants: vec![user, relayer],
            weights: vec![50, 50],
            quorum: 100,
            challenge: 0,
            nonce,
        }
    }
}

/// Collateral split agreed with the coordination network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAllocation {
    pub participant: Address,
    pub asset: Asset,
    pub amount: Amount,
}

/// Session-open proposal sent over the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProposal {
    pub definition: ChannelDefinition,
    pub allocations: Vec<ChannelAllocation>,
    /// Relayer signature over the proposal payload.
    #[serde(default)]
    pub signature: String,
}

/// Messages the relayer sends to the coordination network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    CreateSession(ChannelProposal),
    StateUpdate {
        session_id: String,
        allocations: Vec<ChannelAllocation>,
        #[serde(default)]
        signature: String,
    },
    Ping,
}

/// Messages the coordination network sends back.
///
/// A closed tagged union: the gateway decodes frames into this enum and the
/// consumer matches exhaustively. Frames that fail to decode are dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    SessionCreated {
        session_id: String,
        participants: Vec<Address>,
    },
    StateUpdated {
        session_id: String,
    },
    Error {
        message: String,
    },
    Pong,
}
