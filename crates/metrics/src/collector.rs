use prometheus::{Encoder, TextEncoder};
use thiserror::Error;

use crate::metrics::*;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to encode metrics: {0}")]
    Encode(String),
}

/// Facade over the process-wide metric statics.
#[derive(Debug, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_deposit_processed(&self) {
        DEPOSITS_PROCESSED.inc();
    }

    pub fn record_channel_opened(&self) {
        CHANNELS_OPENED.inc();
        SESSIONS_TRACKED.inc();
    }

    pub fn record_session_confirmed(&self) {
        SESSIONS_CONFIRMED.inc();
    }

    pub fn record_batch_submitted(&self, trade_count: usize, gas_used: u64) {
        BATCHES_SUBMITTED.inc();
        TRADES_EXECUTED.inc_by(trade_count as u64);
        GAS_USED.inc_by(gas_used);
    }

    pub fn record_settlement_failure(&self, cause: &str) {
        SETTLEMENT_FAILURES.with_label_values(&[cause]).inc();
    }

    pub fn record_follower_excluded(&self) {
        FOLLOWERS_EXCLUDED.inc();
    }

    pub fn record_gateway_reconnect(&self) {
        GATEWAY_RECONNECTS.inc();
    }

    /// Export everything in Prometheus text format.
    pub fn export(&self) -> Result<String, MetricsError> {
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::Encode(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encode(e.to_string()))
    }
}
