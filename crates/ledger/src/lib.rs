pub mod client;
pub mod rpc;

pub use client::{LedgerClient, LedgerError, MockLedgerClient};
pub use rpc::{JsonRpcClient, RpcLedgerClient};
