use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("bot '{0}' is already registered")]
    BotAlreadyExists(String),

    #[error("bot '{0}' is not registered")]
    BotNotFound(String),

    #[error(
        "magic number {magic} is already owned by strategy '{existing_strategy}', cannot register '{new_strategy}'"
    )]
    MagicNumberConflict {
        magic: i64,
        existing_strategy: String,
        new_strategy: String,
    },

    #[error("bot '{0}' did not stop within the shutdown grace period")]
    StopTimedOut(String),

    #[error(transparent)]
    Broker(#[from] broker::BrokerError),

    #[error(transparent)]
    Store(#[from] trade_store::TradeStoreError),

    #[error(transparent)]
    Logger(#[from] trade_logger::TradeLoggerError),

    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed IPC payload: {0}")]
    Serde(#[from] serde_json::Error),
}
