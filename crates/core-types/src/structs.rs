use crate::enums::{BotStatus, CloseReason, CommandAction, EventType, OrderSide, SignalType, TradeStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One lifecycle record per opened position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub ticket: i64,
    pub magic_number: i64,
    pub bot_id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub action: OrderSide,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub sl_price: Option<Decimal>,
    pub tp_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub profit_pips: Option<Decimal>,
    pub commission: Decimal,
    pub swap: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    pub close_reason: Option<CloseReason>,
    pub signal_data: Option<String>,
    pub market_context: Option<String>,
}

impl Trade {
    /// A fresh, unsaved `opened` trade; mirrors `TradeLogger::log_opened`'s construction.
    #[allow(clippy::too_many_arguments)]
    pub fn new_opened(
        ticket: i64,
        magic_number: i64,
        bot_id: impl Into<String>,
        strategy_name: impl Into<String>,
        symbol: impl Into<String>,
        action: OrderSide,
        volume: Decimal,
        entry_price: Decimal,
        sl_price: Option<Decimal>,
        tp_price: Option<Decimal>,
        signal_data: Option<String>,
        market_context: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket,
            magic_number,
            bot_id: bot_id.into(),
            strategy_name: strategy_name.into(),
            symbol: symbol.into(),
            action,
            volume,
            entry_price,
            sl_price,
            tp_price,
            exit_price: None,
            profit: None,
            profit_pips: None,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            opened_at: Utc::now(),
            closed_at: None,
            status: TradeStatus::Opened,
            close_reason: None,
            signal_data,
            market_context,
        }
    }
}

/// One record per strategy decision, regardless of execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub bot_id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub timeframe: String,
    pub signal_type: SignalType,
    pub generated_at: DateTime<Utc>,
    pub price_at_signal: Decimal,
    pub was_executed: bool,
    pub execution_ticket: Option<i64>,
    pub skip_reason: Option<String>,
    pub indicators_snapshot: Option<String>,
}

/// One bar of OHLCV market data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A tradable instrument as resolved by the broker's symbol search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub digits: u32,
    pub visible: bool,
    pub tradable: bool,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last_tick_age_secs: i64,
    pub session_active: bool,
    /// Normal spread for this symbol, in points (`1 / 10^digits`). A quoted
    /// spread more than 10x this, combined with a stale tick, signals a
    /// closed or illiquid market rather than an active one.
    pub nominal_spread_points: Decimal,
}

/// A currently open position, as reported fresh by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: i64,
    pub symbol: String,
    pub magic_number: i64,
    pub side: OrderSide,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub sl_price: Option<Decimal>,
    pub tp_price: Option<Decimal>,
    pub profit: Decimal,
}

/// One side (entry or exit) of a position's lifecycle, from the broker's history ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub position_id: i64,
    pub order_id: i64,
    pub time: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
    pub deal_type: OrderSide,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub magic_number: i64,
    pub comment: String,
    pub symbol: String,
}

/// A snapshot of account-level financials.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: i64,
    pub balance: Decimal,
    pub equity: Decimal,
    pub profit: Decimal,
    pub free_margin: Decimal,
    pub leverage: i64,
    pub trade_mode: i32,
}

/// The broker's response to an order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub ticket: i64,
    pub retcode: i32,
    pub volume: Decimal,
    pub price: Decimal,
}

/// Filter applied to a `positions` query.
#[derive(Debug, Clone, Default)]
pub struct PositionFilter {
    pub symbol: Option<String>,
    pub magic_number: Option<i64>,
}

/// A registered strategy instance bound to one (symbol, timeframe, interval) tuple.
/// In-memory only — never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRegistration {
    pub bot_id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub timeframe: String,
    pub interval_seconds: u64,
    pub window_size: usize,
    pub magic_number: i64,
}

impl BotRegistration {
    /// Builds the default `Strategy_Symbol_Timeframe` bot-id.
    pub fn default_bot_id(strategy_name: &str, symbol: &str, timeframe: &str) -> String {
        format!("{strategy_name}_{symbol}_{timeframe}")
    }
}

/// Per-bot row within a `FleetStateSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStateSnapshot {
    pub bot_id: String,
    pub status: BotStatus,
    pub symbol: String,
    pub timeframe: String,
    pub interval_seconds: u64,
    pub magic_number: i64,
    pub is_alive: bool,
}

/// The full fleet status, written to `bots_state.json` after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetStateSnapshot {
    pub global_paused: bool,
    pub bots: Vec<BotStateSnapshot>,
}

/// A single entry in the on-disk command queue (`bots_commands.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub action: CommandAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
}

/// A lifecycle/trade/signal notification published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event_type,
            payload,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }
}

/// Per-bot aggregate statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct BotTradingStats {
    pub total: i64,
    pub open: i64,
    pub closed: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate_pct: Decimal,
    pub total_profit: Decimal,
    pub avg_profit: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::CloseReason;
    use std::str::FromStr;

    #[test]
    fn default_bot_id_joins_strategy_symbol_timeframe() {
        assert_eq!(
            BotRegistration::default_bot_id("SuperTrend", "EURUSD", "H1"),
            "SuperTrend_EURUSD_H1"
        );
    }

    #[test]
    fn new_opened_trade_has_no_exit_fields() {
        let trade = Trade::new_opened(
            1001,
            55,
            "SuperTrend_EURUSD_H1",
            "SuperTrend",
            "EURUSD",
            OrderSide::Buy,
            Decimal::new(5, 2),
            Decimal::new(110000, 5),
            Some(Decimal::new(109900, 5)),
            Some(Decimal::new(110300, 5)),
            None,
            None,
        );
        assert_eq!(trade.status, TradeStatus::Opened);
        assert!(trade.exit_price.is_none());
        assert!(trade.closed_at.is_none());
        assert_eq!(trade.opened_at <= Utc::now(), true);
    }

    #[test]
    fn close_reason_round_trips_through_str() {
        for reason in [
            CloseReason::Sl,
            CloseReason::Tp,
            CloseReason::Manual,
            CloseReason::Signal,
            CloseReason::Synced,
            CloseReason::EndOfData,
        ] {
            assert_eq!(CloseReason::from_str(reason.as_str()).unwrap(), reason);
        }
        assert!(CloseReason::from_str("bogus").is_err());
    }
}
