//! # Core Types
//!
//! Layer-0 crate: the shared data model for the bot fleet controller. Depends on
//! nothing else in the workspace so every other crate can depend on it freely.

pub mod enums;
pub mod error;
pub mod structs;

pub use enums::{
    BotStatus, CloseReason, CommandAction, EventType, FillingPolicy, OrderSide, SignalType,
    TradeStatus,
};
pub use error::CoreError;
pub use structs::{
    AccountInfo, Bar, BotRegistration, BotStateSnapshot, BotTradingStats, CommandMessage, Deal,
    Event, FleetStateSnapshot, OrderResult, Position, PositionFilter, Signal, SymbolInfo, Trade,
};
