//! # Strategies
//!
//! Defines the `Strategy` trait: the polymorphic contract every trading strategy
//! must satisfy to be run by a bot worker.
//!
//! ## Architectural principles
//!
//! - **Layer 1 logic.** A pure logic crate. No knowledge of databases, brokers, or
//!   the fleet controller — only `core-types`.
//! - **Strategy-agnostic core.** The fleet controller and bot workers operate on
//!   `dyn Strategy` trait objects and never introspect a strategy's internals
//!   beyond the operations below.
//! - **Out-of-core strategies.** Concrete trading logic (moving-average crossovers,
//!   mean reversion, whatever a given deployment runs) lives outside this crate and
//!   is supplied by the binary that wires up the fleet. `ma_crossover` below is a
//!   reference implementation used by this crate's own tests, not a production
//!   strategy.

pub mod error;
pub mod ma_crossover;

pub use error::StrategyError;
pub use ma_crossover::MovingAverageCrossover;

use core_types::{Bar, OrderSide, SignalType};
use rust_decimal::Decimal;

/// Options a strategy exposes so the controller can apply its position-management
/// policy without understanding the strategy's internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyParameters {
    /// Symbols this strategy may be instantiated against, in preference order.
    pub symbols: Vec<String>,
    /// If true, the controller closes every position this strategy owns on the
    /// traded symbol before submitting a new entry.
    pub close_before_open: bool,
    /// Cap on simultaneously open positions; consulted only when
    /// `close_before_open` is false. Must be at least 1.
    pub max_open_positions: u32,
}

/// The polymorphic contract every trading strategy satisfies.
///
/// `&mut self` on `generate_signal` lets a strategy carry internal state (e.g. a
/// running indicator) across calls; the core never introspects it beyond the
/// methods below. `Send + Sync` let strategy instances move into a bot worker's task.
pub trait Strategy: Send + Sync {
    /// Immutable, unique-across-strategy-classes identifier used for trade
    /// attribution and broker order tagging.
    fn magic_number(&self) -> i64;

    /// Produces a trading decision from the supplied bar window, evaluated as of
    /// `current_index`. Pure with respect to the window; may consult and update
    /// internal state across calls.
    fn generate_signal(&mut self, bar_window: &[Bar], current_index: usize) -> SignalType;

    /// Enumerated options consumed by the controller's position-management policy.
    fn parameters(&self) -> StrategyParameters;

    /// Strategy-owned position sizing (fixed, percent-risk, Kelly — immaterial to
    /// the core). The controller does not clamp the result to the broker's
    /// min/max/step; the strategy is responsible for respecting them.
    fn position_size(&self, symbol: &str, equity: Decimal, entry_price: Decimal) -> Decimal;

    /// Strategy-owned stop-loss / take-profit levels, already rounded to the
    /// symbol's digits. Either may be absent.
    fn sl_tp(
        &self,
        symbol: &str,
        action: OrderSide,
        entry_price: Decimal,
    ) -> (Option<Decimal>, Option<Decimal>);
}
