use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradeStoreError {
    #[error("failed to open trade store at '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored value for column '{column}': {reason}")]
    InvalidStoredValue { column: String, reason: String },
}
