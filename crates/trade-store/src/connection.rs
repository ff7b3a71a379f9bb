use crate::error::TradeStoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The on-disk filename for a given account's trade store, one file per broker account.
///
/// Mirrors the original framework's `trades_account_<login>.db` convention; falls back
/// to `trades_default.db` when no account login is known yet (e.g. before the broker
/// adapter has connected).
pub fn db_path(data_dir: &Path, account_login: Option<i64>) -> PathBuf {
    match account_login {
        Some(login) => data_dir.join(format!("trades_account_{login}.db")),
        None => data_dir.join("trades_default.db"),
    }
}

/// Opens (creating if absent) the SQLite database at `path` and ensures the schema exists.
pub async fn open(path: &Path) -> Result<SqlitePool, TradeStoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TradeStoreError::Open {
            path: path.display().to_string(),
            source: sqlx::Error::Io(e),
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(|e| TradeStoreError::Open {
            path: path.display().to_string(),
            source: e,
        })?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| TradeStoreError::Open {
            path: path.display().to_string(),
            source: e,
        })?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Opens a private, in-memory database. Used by this workspace's own tests.
pub async fn open_in_memory() -> Result<SqlitePool, TradeStoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Creates the `trades` and `signals` tables (and their indexes) if they don't already exist.
async fn run_migrations(pool: &SqlitePool) -> Result<(), TradeStoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            ticket INTEGER NOT NULL,
            magic_number INTEGER NOT NULL,
            bot_id TEXT NOT NULL,
            strategy_name TEXT NOT NULL,
            symbol TEXT NOT NULL,
            action TEXT NOT NULL,
            volume TEXT NOT NULL,
            entry_price TEXT NOT NULL,
            exit_price TEXT,
            sl_price TEXT,
            tp_price TEXT,
            profit TEXT,
            profit_pips TEXT,
            commission TEXT NOT NULL,
            swap TEXT NOT NULL,
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            status TEXT NOT NULL,
            close_reason TEXT,
            signal_data TEXT,
            market_context TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            id TEXT PRIMARY KEY,
            bot_id TEXT NOT NULL,
            strategy_name TEXT NOT NULL,
            symbol TEXT NOT NULL,
            timeframe TEXT NOT NULL,
            signal_type TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            price_at_signal TEXT NOT NULL,
            was_executed INTEGER NOT NULL,
            execution_ticket INTEGER,
            skip_reason TEXT,
            indicators_snapshot TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_trades_bot_id ON trades(bot_id)",
        "CREATE INDEX IF NOT EXISTS idx_trades_magic ON trades(magic_number)",
        "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
        "CREATE INDEX IF NOT EXISTS idx_trades_opened_at ON trades(opened_at)",
        "CREATE INDEX IF NOT EXISTS idx_signals_bot_id ON signals(bot_id)",
        // Enforces "ticket unique per account database for opened positions" (spec.md §3)
        // without constraining historical closed/cancelled rows sharing a ticket.
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_trades_ticket_opened ON trades(ticket) WHERE status = 'opened'",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_uses_account_login_when_known() {
        let dir = Path::new("/data");
        assert_eq!(db_path(dir, Some(12345)), dir.join("trades_account_12345.db"));
        assert_eq!(db_path(dir, None), dir.join("trades_default.db"));
    }

    #[tokio::test]
    async fn open_in_memory_creates_schema() {
        let pool = open_in_memory().await.unwrap();
        sqlx::query("SELECT 1 FROM trades WHERE 1 = 0")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("SELECT 1 FROM signals WHERE 1 = 0")
            .execute(&pool)
            .await
            .unwrap();
    }
}
