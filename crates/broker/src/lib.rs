//! # Broker
//!
//! Defines the `BrokerAdapter` trait: the synchronous-contract-over-async-trait
//! boundary between the fleet and whatever terminal actually holds positions and
//! fills orders. No production terminal integration lives here — only the
//! contract and an in-memory [`simulated::SimulatedBroker`] used by this
//! workspace's own tests and by anything exercising a bot worker offline.

pub mod error;
pub mod simulated;

pub use error::BrokerError;
pub use simulated::SimulatedBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{AccountInfo, Bar, Deal, FillingPolicy, OrderResult, OrderSide, Position, PositionFilter, SymbolInfo};
use rust_decimal::Decimal;

/// The contract a bot worker and the trade sync service drive a broker terminal
/// through. Every method that can fail on the broker side returns a `Result`;
/// the few spec'd as "never throws" (`market_open`) collapse failure into their
/// own return value instead.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Connects with bounded retries (default 3, spaced by a fixed delay).
    async fn initialize(
        &self,
        path: &str,
        login: i64,
        password: &str,
        server: &str,
        timeout_ms: u64,
    ) -> Result<(), BrokerError>;

    /// Cheap probe; must not attempt to reconnect implicitly.
    async fn connected(&self) -> bool;

    /// Shuts down the current session and retries `initialize`. Idempotent.
    async fn reconnect(&self, retries: u32, delay_ms: u64) -> bool;

    /// Resolves `requested` against the broker's symbol universe. Caches
    /// nothing that should outlive a reconnect.
    async fn resolve_symbol(&self, requested: &str) -> Result<SymbolInfo, BrokerError>;

    /// Marks `resolved_name` visible/selectable in the terminal's watchlist.
    async fn select_symbol(&self, resolved_name: &str) -> Result<(), BrokerError>;

    /// True iff the terminal is connected, algo trading is allowed, the symbol
    /// resolves and is tradable, and a recent, non-zero tick exists. Never
    /// throws — any failure path simply yields `false`.
    async fn market_open(&self, requested_symbol: &str) -> bool;

    /// Up to `count` time-ordered OHLCV bars, timestamps normalized to UTC
    /// seconds. Retries up to 3 times with a short back-off.
    async fn rates(&self, symbol: &str, timeframe: &str, count: usize) -> Result<Vec<Bar>, BrokerError>;

    /// A fresh snapshot of open positions matching `filter`.
    async fn positions(&self, filter: PositionFilter) -> Result<Vec<Position>, BrokerError>;

    /// Closed/partial deals between `from` and `to`, inclusive.
    async fn history_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>, BrokerError>;

    #[allow(clippy::too_many_arguments)]
    async fn submit_market(
        &self,
        symbol: &str,
        action: OrderSide,
        volume: Decimal,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        magic: i64,
        comment: &str,
        filling_policy: FillingPolicy,
    ) -> Result<OrderResult, BrokerError>;

    #[allow(clippy::too_many_arguments)]
    async fn submit_pending(
        &self,
        symbol: &str,
        action: OrderSide,
        price: Decimal,
        expiration: Option<DateTime<Utc>>,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        magic: i64,
        comment: &str,
        filling_policy: FillingPolicy,
    ) -> Result<OrderResult, BrokerError>;

    /// Updates SL/TP on an existing position. The closing order's side is
    /// inferred from the position's own side, since it isn't supplied here.
    async fn modify_sl_tp(&self, ticket: i64, sl: Option<Decimal>, tp: Option<Decimal>) -> Result<(), BrokerError>;

    /// Submits the opposite-direction deal that closes `ticket`. Returns `None`
    /// on failure rather than an error, mirroring the broker's own null-result
    /// convention for this operation.
    async fn close_by_ticket(
        &self,
        ticket: i64,
        symbol: &str,
        volume: Decimal,
        position_type: OrderSide,
    ) -> Option<OrderResult>;

    /// Cancels a pending order.
    async fn remove_pending(&self, ticket: i64) -> Result<(), BrokerError>;

    async fn account_info(&self) -> Result<AccountInfo, BrokerError>;
}
