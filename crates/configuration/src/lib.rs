//! # Configuration
//!
//! Loads the fleet controller's environment-driven configuration and
//! initializes the process-wide `tracing` subscriber.

pub mod error;
pub mod settings;

pub use error::ConfigError;
pub use settings::{BrokerConfig, Config, FleetConfig, LoggingConfig};

/// Loads `Config` from a `.env` file (if present) plus the process environment,
/// via the `config` crate's builder.
///
/// The four `MT5_*` credential variables are required; everything else falls back
/// to the documented defaults in `FleetConfig::default` / `LoggingConfig::default`.
pub fn load_config() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let defaults = FleetConfig::default();
    let logging_defaults = LoggingConfig::default();

    let broker = config::Config::builder()
        .set_default("timeout_ms", "60000")?
        .set_default("symbol_suffix", "")?
        .set_default("symbol_prefix", "")?
        .add_source(
            config::Environment::with_prefix("MT5")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<BrokerConfig>()?;

    let fleet = config::Config::builder()
        .set_default("max_consecutive_errors", defaults.max_consecutive_errors.to_string())?
        .set_default("sync_interval_minutes", defaults.sync_interval_minutes.to_string())?
        .set_default("sync_history_days", defaults.sync_history_days.to_string())?
        .set_default(
            "command_poll_interval_secs",
            defaults.command_poll_interval_secs.to_string(),
        )?
        .set_default("event_history_capacity", defaults.event_history_capacity.to_string())?
        .set_default("data_dir", defaults.data_dir.to_string_lossy().into_owned())?
        .set_default("ipc_dir", defaults.ipc_dir.to_string_lossy().into_owned())?
        .add_source(
            config::Environment::with_prefix("FLEET")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<FleetConfig>()?;

    let logging = config::Config::builder()
        .set_default("filter", logging_defaults.filter)?
        .add_source(config::Environment::with_prefix("LOG").separator("__"))
        .build()?
        .try_deserialize::<LoggingConfig>()?;

    let config = Config {
        broker,
        fleet,
        logging,
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.fleet.max_consecutive_errors == 0 {
        return Err(ConfigError::validation(
            "fleet.max_consecutive_errors must be at least 1",
        ));
    }
    if config.fleet.event_history_capacity == 0 {
        return Err(ConfigError::validation(
            "fleet.event_history_capacity must be at least 1",
        ));
    }
    Ok(())
}

/// Installs the global `tracing` subscriber. Call once, at process start.
pub fn init_tracing(logging: &LoggingConfig) -> Result<(), ConfigError> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_new(&logging.filter).map_err(|e| ConfigError::Tracing(e.to_string()))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| ConfigError::Tracing(e.to_string()))
}
