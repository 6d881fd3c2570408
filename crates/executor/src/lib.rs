pub mod executor;
pub mod registry;

pub use executor::{BroadcastOutcome, ExecuteError, TradeExecutor};
pub use registry::{FollowerRegistry, HttpFollowerRegistry, RegistryError, StaticRegistry};
