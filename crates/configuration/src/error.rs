use thiserror::Error;

/// Represents all possible errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Wraps errors from the `config` crate when building or deserializing the
    /// environment source (missing required field, bad type, etc).
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// Occurs when configuration values fail validation.
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// The `tracing` global subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    Tracing(String),
}

impl ConfigError {
    /// Creates a new validation error with a formatted message.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
}
