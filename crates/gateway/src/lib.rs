pub mod connection;
pub mod transport;

pub use connection::{ConnectionState, Gateway, GatewayError};
pub use transport::{ChannelTransport, MockTransport};
