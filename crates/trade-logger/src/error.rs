use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradeLoggerError {
    #[error(transparent)]
    Store(#[from] trade_store::TradeStoreError),
}
