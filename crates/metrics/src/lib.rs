//! Operational counters for the copybot relayer.
//!
//! Exposed as Prometheus text on the API's `/metrics` endpoint.

pub mod collector;
pub mod metrics;

pub use collector::{MetricsCollector, MetricsError};
