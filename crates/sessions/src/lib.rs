pub mod manager;
pub mod store;

pub use manager::{BalanceOp, SessionError, SessionManager};
pub use store::SessionStore;
