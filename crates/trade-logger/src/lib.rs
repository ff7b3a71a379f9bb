//! Layer 2 façade over [`trade_store`]: records trade opens/closes and signals
//! with the derived fields (pip profit, timestamps, close reason) a bot
//! worker shouldn't have to compute itself.

pub mod error;

use chrono::Utc;
use core_types::{BotTradingStats, CloseReason, OrderSide, Signal, SignalType, Trade, TradeStatus};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use trade_store::TradeStore;
use uuid::Uuid;

pub use error::TradeLoggerError;

/// Pip size used to convert a raw price delta into pips, classified by symbol.
/// Shared with `fleet`'s sync service, which derives profit-in-pips the same way
/// when reconciling broker history.
pub fn pip_size(symbol: &str) -> Decimal {
    let upper = symbol.to_uppercase();
    if upper.contains("JPY") {
        Decimal::new(1, 2) // 0.01
    } else if upper.contains("XAU") || upper.contains("GOLD") {
        Decimal::new(1, 1) // 0.1
    } else {
        Decimal::new(1, 4) // 0.0001
    }
}

pub fn profit_pips(symbol: &str, action: OrderSide, entry_price: Decimal, exit_price: Decimal) -> Decimal {
    let pip = pip_size(symbol);
    let raw = match action {
        OrderSide::Buy => (exit_price - entry_price) / pip,
        OrderSide::Sell => (entry_price - exit_price) / pip,
    };
    raw.round_dp(1)
}

#[derive(Debug, Clone)]
pub struct TradeLogger {
    store: TradeStore,
}

impl TradeLogger {
    pub fn new(store: TradeStore) -> Self {
        Self { store }
    }

    /// Records the opening of a position. Returns the new trade's internal id.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_opened(
        &self,
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
        signal_data: Option<JsonValue>,
        market_context: Option<JsonValue>,
    ) -> Result<Uuid, TradeLoggerError> {
        let trade = Trade::new_opened(
            ticket,
            magic_number,
            bot_id,
            strategy_name,
            symbol,
            action,
            volume,
            entry_price,
            sl_price,
            tp_price,
            signal_data.map(|v| v.to_string()),
            market_context.map(|v| v.to_string()),
        );
        let id = trade.id;
        self.store.insert_trade(&trade).await?;
        tracing::info!(ticket, %id, "trade opened");
        Ok(id)
    }

    /// Records the closing of a position identified by MT5 ticket. Returns `false`
    /// (after logging a warning) if no open trade with that ticket exists.
    pub async fn log_closed(
        &self,
        ticket: i64,
        exit_price: Decimal,
        profit: Decimal,
        reason: CloseReason,
        commission: Decimal,
        swap: Decimal,
    ) -> Result<bool, TradeLoggerError> {
        let Some(trade) = self.store.get_by_ticket(ticket).await? else {
            tracing::warn!(ticket, "trade logger: no open trade found for ticket");
            return Ok(false);
        };
        if trade.status != TradeStatus::Opened {
            tracing::warn!(ticket, "trade logger: trade is already closed");
            return Ok(false);
        }

        let pips = profit_pips(&trade.symbol, trade.action, trade.entry_price, exit_price);
        let updated = self
            .store
            .close_by_ticket(ticket, exit_price, profit, pips, commission, swap, Utc::now(), reason)
            .await?;

        if updated {
            tracing::info!(ticket, %profit, pips = %pips, "trade closed");
        }
        Ok(updated)
    }

    pub async fn log_signal(
        &self,
        bot_id: impl Into<String>,
        strategy_name: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        signal_type: SignalType,
        price_at_signal: Decimal,
        was_executed: bool,
        execution_ticket: Option<i64>,
        skip_reason: Option<String>,
        indicators_snapshot: Option<JsonValue>,
    ) -> Result<(), TradeLoggerError> {
        let signal = Signal {
            id: Uuid::new_v4(),
            bot_id: bot_id.into(),
            strategy_name: strategy_name.into(),
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            signal_type,
            generated_at: Utc::now(),
            price_at_signal,
            was_executed,
            execution_ticket,
            skip_reason,
            indicators_snapshot: indicators_snapshot.map(|v| v.to_string()),
        };
        self.store.insert_signal(&signal).await?;
        Ok(())
    }

    pub async fn open_trades(&self, bot_id: Option<&str>) -> Result<Vec<Trade>, TradeLoggerError> {
        Ok(self.store.list_open(bot_id).await?)
    }

    pub async fn bot_history(&self, bot_id: &str, limit: i64) -> Result<Vec<Trade>, TradeLoggerError> {
        Ok(self.store.list_by_bot(bot_id, limit).await?)
    }

    pub async fn bot_stats(&self, bot_id: &str) -> Result<BotTradingStats, TradeLoggerError> {
        Ok(self.store.bot_stats(bot_id).await?)
    }

    pub async fn recent_signals(&self, bot_id: &str, limit: i64) -> Result<Vec<Signal>, TradeLoggerError> {
        Ok(self.store.list_signals_by_bot(bot_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trade_store::open_in_memory;

    async fn logger() -> TradeLogger {
        TradeLogger::new(TradeStore::new(open_in_memory().await.unwrap()))
    }

    #[test]
    fn pip_size_classifies_by_symbol() {
        assert_eq!(pip_size("USDJPY"), dec!(0.01));
        assert_eq!(pip_size("XAUUSD"), dec!(0.1));
        assert_eq!(pip_size("EURUSD"), dec!(0.0001));
    }

    #[test]
    fn profit_pips_accounts_for_direction() {
        let pips = profit_pips("EURUSD", OrderSide::Buy, dec!(1.10000), dec!(1.10050));
        assert_eq!(pips, dec!(5.0));

        let pips_sell = profit_pips("EURUSD", OrderSide::Sell, dec!(1.10000), dec!(1.09950));
        assert_eq!(pips_sell, dec!(5.0));
    }

    #[tokio::test]
    async fn log_opened_then_closed_round_trip() {
        let logger = logger().await;
        logger
            .log_opened(
                5001,
                77,
                "SuperTrend_XAUUSD_H1",
                "SuperTrend",
                "XAUUSD",
                OrderSide::Buy,
                dec!(0.10),
                dec!(1900.00),
                Some(dec!(1895.00)),
                Some(dec!(1910.00)),
                None,
                None,
            )
            .await
            .unwrap();

        let closed = logger
            .log_closed(5001, dec!(1902.50), dec!(25.0), CloseReason::Tp, dec!(0.0), dec!(0.0))
            .await
            .unwrap();
        assert!(closed);

        let history = logger.bot_history("SuperTrend_XAUUSD_H1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].profit_pips, Some(dec!(25.0)));
        assert_eq!(history[0].close_reason, Some(CloseReason::Tp));
    }

    #[tokio::test]
    async fn log_closed_warns_and_returns_false_when_ticket_missing() {
        let logger = logger().await;
        let closed = logger
            .log_closed(9999, dec!(1.0), dec!(0.0), CloseReason::Manual, dec!(0.0), dec!(0.0))
            .await
            .unwrap();
        assert!(!closed);
    }
}
