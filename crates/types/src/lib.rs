pub mod address;
pub mod amount;
pub mod asset;
pub mod channel;
pub mod deposit;
pub mod price;
pub mod session;
pub mod trade;

pub use address::*;
pub use amount::*;
pub use asset::*;
pub use channel::*;
pub use deposit::*;
pub use price::*;
pub use session::*;
pub use trade::*;

/// Protocol tag carried in every channel proposal sent to the
/// coordination network.
pub const CHANNEL_PROTOCOL: &str = "pyusd-copybot-v1";
