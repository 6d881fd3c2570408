pub mod watcher;

pub use watcher::{DepositWatcher, WatchError};
