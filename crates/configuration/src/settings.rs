use serde::Deserialize;
use std::path::PathBuf;

/// The root configuration structure for the fleet controller.
///
/// Loaded from environment variables (optionally via a `.env` file).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub fleet: FleetConfig,
    pub logging: LoggingConfig,
}

/// Broker terminal connection parameters (`MT5_*` env vars).
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub path: String,
    pub login: i64,
    pub password: String,
    pub server: String,
    /// Connect timeout in milliseconds.
    pub timeout_ms: u64,
    /// Broker-specific envelope tried first during symbol resolution, e.g. `.ecn`.
    pub symbol_suffix: String,
    /// Broker-specific prefix tried first during symbol resolution, e.g. `#`.
    pub symbol_prefix: String,
}

/// Operational knobs for the fleet controller and its background services.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Consecutive failures before a worker transitions to `stopped`.
    pub max_consecutive_errors: u32,
    /// Trade Sync Service tick interval (default 10 minutes).
    pub sync_interval_minutes: u64,
    /// How many days of broker history the sync service pulls per cycle (default 7).
    pub sync_history_days: i64,
    /// How often the command-queue file is polled (default 2s).
    pub command_poll_interval_secs: u64,
    /// Bounded circular history retained by the event bus (default 1000).
    pub event_history_capacity: usize,
    /// Directory holding the per-account trade-store database files.
    pub data_dir: PathBuf,
    /// Directory holding `bots_state.json` / `bots_commands.json`.
    pub ipc_dir: PathBuf,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 5,
            sync_interval_minutes: 10,
            sync_history_days: 7,
            command_poll_interval_secs: 2,
            event_history_capacity: 1000,
            data_dir: PathBuf::from("./data"),
            ipc_dir: PathBuf::from("."),
        }
    }
}

/// Logging configuration consumed by `init_tracing`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` `EnvFilter` directive, e.g. `"info"` or `"fleet=debug,info"`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
