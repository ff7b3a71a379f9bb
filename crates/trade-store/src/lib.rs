//! Layer 2: embedded persistence for trades and signals.
//!
//! One SQLite database file per broker account (see [`connection::db_path`]),
//! opened lazily by the fleet controller at startup and shared by every bot
//! worker and the trade sync service through a single [`TradeStore`].

pub mod connection;
pub mod error;
pub mod repository;

pub use connection::{db_path, open, open_in_memory};
pub use error::TradeStoreError;
pub use repository::TradeStore;
