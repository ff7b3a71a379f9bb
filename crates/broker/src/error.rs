use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("failed to connect to broker terminal after {attempts} attempts: {reason}")]
    ConnectionError { attempts: u32, reason: String },

    #[error("no symbol on the broker matched requested name '{0}'")]
    SymbolNotFound(String),

    #[error("broker refused to make symbol '{0}' visible/selectable")]
    SymbolSelectError(String),

    #[error("order submission rejected, retcode {retcode}: {message}")]
    OrderSubmitError { retcode: i32, message: String },
}
