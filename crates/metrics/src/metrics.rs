use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

lazy_static! {
    /// Vault deposits applied to sessions (deduplicated).
    pub static ref DEPOSITS_PROCESSED: IntCounter = register_int_counter!(
        "copybot_deposits_processed_total",
        "Total vault deposits applied to sessions"
    )
    .unwrap();

    /// Channel-open proposals sent to the coordination network.
    pub static ref CHANNELS_OPENED: IntCounter = register_int_counter!(
        "copybot_channels_opened_total",
        "Total state-channel open proposals sent"
    )
    .unwrap();

    /// Sessions confirmed active by the coordination network.
    pub static ref SESSIONS_CONFIRMED: IntCounter = register_int_counter!(
        "copybot_sessions_confirmed_total",
        "Total sessions confirmed active"
    )
    .unwrap();

    /// Individual trade legs executed inside settled batches.
    pub static ref TRADES_EXECUTED: IntCounter = register_int_counter!(
        "copybot_trades_executed_total",
        "Total trade legs settled"
    )
    .unwrap();

    /// Batches submitted to the ledger.
    pub static ref BATCHES_SUBMITTED: IntCounter = register_int_counter!(
        "copybot_batches_submitted_total",
        "Total settlement batches submitted"
    )
    .unwrap();

    /// Settlement failures by class.
    pub static ref SETTLEMENT_FAILURES: IntCounterVec = register_int_counter_vec!(
        "copybot_settlement_failures_total",
        "Total settlement failures by cause",
        &["cause"]
    )
    .unwrap();

    /// Followers excluded from batches for sub-threshold balances.
    pub static ref FOLLOWERS_EXCLUDED: IntCounter = register_int_counter!(
        "copybot_followers_excluded_total",
        "Total followers excluded from batches for insufficient balance"
    )
    .unwrap();

    /// Gateway reconnect attempts.
    pub static ref GATEWAY_RECONNECTS: IntCounter = register_int_counter!(
        "copybot_gateway_reconnects_total",
        "Total gateway reconnect attempts"
    )
    .unwrap();

    /// Gas consumed by settlement transactions.
    pub static ref GAS_USED: IntCounter = register_int_counter!(
        "copybot_settlement_gas_used_total",
        "Total gas consumed by settlement transactions"
    )
    .unwrap();

    /// Sessions currently tracked, by status.
    pub static ref SESSIONS_TRACKED: IntGauge = register_int_gauge!(
        "copybot_sessions_tracked",
        "Number of sessions currently tracked"
    )
    .unwrap();
}
