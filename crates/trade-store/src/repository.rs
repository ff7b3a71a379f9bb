use crate::error::TradeStoreError;
use chrono::{DateTime, Utc};
use core_types::{
    BotTradingStats, CloseReason, OrderSide, Signal, SignalType, Trade, TradeStatus,
};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// Embedded relational persistence for `Trade` and `Signal` rows, one SQLite
/// database per broker account (see [`crate::connection::db_path`]).
///
/// Every operation opens its own short transaction against a shared connection
/// pool; the fleet controller is the single logical writer, but the pool
/// tolerates interleaved writes from the trade sync service because the
/// `ticket` + `status = 'opened'` guard on close-path updates makes them
/// idempotent (spec.md §5).
#[derive(Debug, Clone)]
pub struct TradeStore {
    pool: SqlitePool,
}

impl TradeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a freshly opened trade. `trade.status` is expected to be `Opened`.
    pub async fn insert_trade(&self, trade: &Trade) -> Result<(), TradeStoreError> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, ticket, magic_number, bot_id, strategy_name, symbol, action,
                volume, entry_price, exit_price, sl_price, tp_price,
                profit, profit_pips, commission, swap,
                opened_at, closed_at, status, close_reason, signal_data, market_context
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(trade.id.to_string())
        .bind(trade.ticket)
        .bind(trade.magic_number)
        .bind(&trade.bot_id)
        .bind(&trade.strategy_name)
        .bind(&trade.symbol)
        .bind(trade.action.to_string())
        .bind(trade.volume.to_string())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.map(|d| d.to_string()))
        .bind(trade.sl_price.map(|d| d.to_string()))
        .bind(trade.tp_price.map(|d| d.to_string()))
        .bind(trade.profit.map(|d| d.to_string()))
        .bind(trade.profit_pips.map(|d| d.to_string()))
        .bind(trade.commission.to_string())
        .bind(trade.swap.to_string())
        .bind(trade.opened_at.to_rfc3339())
        .bind(trade.closed_at.map(|t| t.to_rfc3339()))
        .bind(trade.status.as_str())
        .bind(trade.close_reason.map(|r| r.as_str()))
        .bind(&trade.signal_data)
        .bind(&trade.market_context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Closes the open trade identified by `ticket` (guarded by `status = 'opened'`,
    /// matching the sync service's idempotent update). Returns `false` if no such
    /// row exists — the caller logs a warning rather than treating this as fatal.
    #[allow(clippy::too_many_arguments)]
    pub async fn close_by_ticket(
        &self,
        ticket: i64,
        exit_price: Decimal,
        profit: Decimal,
        profit_pips: Decimal,
        commission_delta: Decimal,
        swap_delta: Decimal,
        closed_at: DateTime<Utc>,
        close_reason: CloseReason,
    ) -> Result<bool, TradeStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET
                exit_price = ?, profit = ?, profit_pips = ?,
                commission = commission + ?, swap = swap + ?,
                closed_at = ?, status = 'closed', close_reason = ?
            WHERE ticket = ? AND status = 'opened'
            "#,
        )
        .bind(exit_price.to_string())
        .bind(profit.to_string())
        .bind(profit_pips.to_string())
        .bind(commission_delta.to_string())
        .bind(swap_delta.to_string())
        .bind(closed_at.to_rfc3339())
        .bind(close_reason.as_str())
        .bind(ticket)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_ticket(&self, ticket: i64) -> Result<Option<Trade>, TradeStoreError> {
        let row = sqlx::query("SELECT * FROM trades WHERE ticket = ?")
            .bind(ticket)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_trade(&r)).transpose()
    }

    pub async fn list_open(&self, bot_id: Option<&str>) -> Result<Vec<Trade>, TradeStoreError> {
        let rows = match bot_id {
            Some(id) => {
                sqlx::query("SELECT * FROM trades WHERE status = 'opened' AND bot_id = ? ORDER BY ticket DESC")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM trades WHERE status = 'opened' ORDER BY ticket DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_trade).collect()
    }

    pub async fn list_by_bot(&self, bot_id: &str, limit: i64) -> Result<Vec<Trade>, TradeStoreError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE bot_id = ? ORDER BY ticket DESC LIMIT ?")
            .bind(bot_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_trade).collect()
    }

    pub async fn list_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bot_id: Option<&str>,
    ) -> Result<Vec<Trade>, TradeStoreError> {
        let rows = match bot_id {
            Some(id) => {
                sqlx::query(
                    "SELECT * FROM trades WHERE opened_at >= ? AND opened_at <= ? AND bot_id = ? ORDER BY ticket DESC",
                )
                .bind(from.to_rfc3339())
                .bind(to.to_rfc3339())
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM trades WHERE opened_at >= ? AND opened_at <= ? ORDER BY ticket DESC",
                )
                .bind(from.to_rfc3339())
                .bind(to.to_rfc3339())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_trade).collect()
    }

    pub async fn list_all(&self, limit: i64) -> Result<Vec<Trade>, TradeStoreError> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY ticket DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_trade).collect()
    }

    pub async fn insert_signal(&self, signal: &Signal) -> Result<(), TradeStoreError> {
        sqlx::query(
            r#"
            INSERT INTO signals (
                id, bot_id, strategy_name, symbol, timeframe, signal_type,
                generated_at, price_at_signal, was_executed, execution_ticket,
                skip_reason, indicators_snapshot
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&signal.bot_id)
        .bind(&signal.strategy_name)
        .bind(&signal.symbol)
        .bind(&signal.timeframe)
        .bind(signal_type_str(signal.signal_type))
        .bind(signal.generated_at.to_rfc3339())
        .bind(signal.price_at_signal.to_string())
        .bind(signal.was_executed)
        .bind(signal.execution_ticket)
        .bind(&signal.skip_reason)
        .bind(&signal.indicators_snapshot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_signals_by_bot(
        &self,
        bot_id: &str,
        limit: i64,
    ) -> Result<Vec<Signal>, TradeStoreError> {
        let rows = sqlx::query("SELECT * FROM signals WHERE bot_id = ? ORDER BY generated_at DESC LIMIT ?")
            .bind(bot_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_signal).collect()
    }

    /// Per-bot aggregate statistics (spec.md §4.4).
    pub async fn bot_stats(&self, bot_id: &str) -> Result<BotTradingStats, TradeStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'opened' THEN 1 ELSE 0 END), 0) AS open_count,
                COALESCE(SUM(CASE WHEN status = 'closed' THEN 1 ELSE 0 END), 0) AS closed_count,
                COALESCE(SUM(CASE WHEN status = 'closed' AND CAST(profit AS REAL) > 0 THEN 1 ELSE 0 END), 0) AS wins,
                COALESCE(SUM(CASE WHEN status = 'closed' AND CAST(profit AS REAL) < 0 THEN 1 ELSE 0 END), 0) AS losses,
                COALESCE(SUM(CASE WHEN status = 'closed' THEN CAST(profit AS REAL) ELSE 0 END), 0.0) AS total_profit,
                COALESCE(AVG(CASE WHEN status = 'closed' THEN CAST(profit AS REAL) END), 0.0) AS avg_profit
            FROM trades WHERE bot_id = ?
            "#,
        )
        .bind(bot_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let open: i64 = row.try_get("open_count")?;
        let closed: i64 = row.try_get("closed_count")?;
        let wins: i64 = row.try_get("wins")?;
        let losses: i64 = row.try_get("losses")?;
        let total_profit: f64 = row.try_get("total_profit")?;
        let avg_profit: f64 = row.try_get("avg_profit")?;

        let win_rate_pct = if wins + losses > 0 {
            Decimal::from(wins) / Decimal::from(wins + losses) * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        Ok(BotTradingStats {
            total,
            open,
            closed,
            wins,
            losses,
            win_rate_pct,
            total_profit: Decimal::try_from(total_profit).unwrap_or(Decimal::ZERO),
            avg_profit: Decimal::try_from(avg_profit).unwrap_or(Decimal::ZERO),
        })
    }
}

fn signal_type_str(signal_type: SignalType) -> &'static str {
    match signal_type {
        SignalType::Buy => "buy",
        SignalType::Sell => "sell",
        SignalType::Hold => "hold",
    }
}

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal, TradeStoreError> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| TradeStoreError::InvalidStoredValue {
            column: column.to_string(),
            reason: e.to_string(),
        })?;
    Decimal::from_str(&raw).map_err(|e| TradeStoreError::InvalidStoredValue {
        column: column.to_string(),
        reason: e.to_string(),
    })
}

fn parse_decimal_opt(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, TradeStoreError> {
    let raw: Option<String> =
        row.try_get(column)
            .map_err(|e| TradeStoreError::InvalidStoredValue {
                column: column.to_string(),
                reason: e.to_string(),
            })?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| TradeStoreError::InvalidStoredValue {
            column: column.to_string(),
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, TradeStoreError> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| TradeStoreError::InvalidStoredValue {
            column: column.to_string(),
            reason: e.to_string(),
        })?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TradeStoreError::InvalidStoredValue {
            column: column.to_string(),
            reason: e.to_string(),
        })
}

fn parse_timestamp_opt(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, TradeStoreError> {
    let raw: Option<String> =
        row.try_get(column)
            .map_err(|e| TradeStoreError::InvalidStoredValue {
                column: column.to_string(),
                reason: e.to_string(),
            })?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| TradeStoreError::InvalidStoredValue {
                column: column.to_string(),
                reason: e.to_string(),
            })
    })
    .transpose()
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade, TradeStoreError> {
    let id_str: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id_str).map_err(|e| TradeStoreError::InvalidStoredValue {
        column: "id".to_string(),
        reason: e.to_string(),
    })?;
    let action_str: String = row.try_get("action")?;
    let action = match action_str.as_str() {
        "buy" => OrderSide::Buy,
        "sell" => OrderSide::Sell,
        other => {
            return Err(TradeStoreError::InvalidStoredValue {
                column: "action".to_string(),
                reason: format!("unknown action '{other}'"),
            })
        }
    };
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<TradeStatus>()
        .map_err(|e| TradeStoreError::InvalidStoredValue {
            column: "status".to_string(),
            reason: e.to_string(),
        })?;
    let close_reason: Option<String> = row.try_get("close_reason")?;
    let close_reason = close_reason
        .map(|s| {
            s.parse::<CloseReason>()
                .map_err(|e| TradeStoreError::InvalidStoredValue {
                    column: "close_reason".to_string(),
                    reason: e.to_string(),
                })
        })
        .transpose()?;

    Ok(Trade {
        id,
        ticket: row.try_get("ticket")?,
        magic_number: row.try_get("magic_number")?,
        bot_id: row.try_get("bot_id")?,
        strategy_name: row.try_get("strategy_name")?,
        symbol: row.try_get("symbol")?,
        action,
        volume: parse_decimal(row, "volume")?,
        entry_price: parse_decimal(row, "entry_price")?,
        sl_price: parse_decimal_opt(row, "sl_price")?,
        tp_price: parse_decimal_opt(row, "tp_price")?,
        exit_price: parse_decimal_opt(row, "exit_price")?,
        profit: parse_decimal_opt(row, "profit")?,
        profit_pips: parse_decimal_opt(row, "profit_pips")?,
        commission: parse_decimal(row, "commission")?,
        swap: parse_decimal(row, "swap")?,
        opened_at: parse_timestamp(row, "opened_at")?,
        closed_at: parse_timestamp_opt(row, "closed_at")?,
        status,
        close_reason,
        signal_data: row.try_get("signal_data")?,
        market_context: row.try_get("market_context")?,
    })
}

fn row_to_signal(row: &SqliteRow) -> Result<Signal, TradeStoreError> {
    let id_str: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id_str).map_err(|e| TradeStoreError::InvalidStoredValue {
        column: "id".to_string(),
        reason: e.to_string(),
    })?;
    let signal_type_str: String = row.try_get("signal_type")?;
    let signal_type = match signal_type_str.as_str() {
        "buy" => SignalType::Buy,
        "sell" => SignalType::Sell,
        "hold" => SignalType::Hold,
        other => {
            return Err(TradeStoreError::InvalidStoredValue {
                column: "signal_type".to_string(),
                reason: format!("unknown signal type '{other}'"),
            })
        }
    };

    Ok(Signal {
        id,
        bot_id: row.try_get("bot_id")?,
        strategy_name: row.try_get("strategy_name")?,
        symbol: row.try_get("symbol")?,
        timeframe: row.try_get("timeframe")?,
        signal_type,
        generated_at: parse_timestamp(row, "generated_at")?,
        price_at_signal: parse_decimal(row, "price_at_signal")?,
        was_executed: row.try_get("was_executed")?,
        execution_ticket: row.try_get("execution_ticket")?,
        skip_reason: row.try_get("skip_reason")?,
        indicators_snapshot: row.try_get("indicators_snapshot")?,
    })
}
