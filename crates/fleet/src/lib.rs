//! # Fleet
//!
//! Layer-3 orchestrator: depends on every other crate in the workspace, exactly
//! as the orchestrator crate it replaces did in the source framework.
//!
//! Three collaborating pieces:
//! - [`worker`] — one cooperative task per running strategy instance (C8).
//! - [`sync_service`] — periodic reconciliation against the broker's deal
//!   history (C7).
//! - [`controller`] — the registry and command surface tying both together,
//!   plus the file-based [`ipc`] the host process polls (C9).

pub mod controller;
pub mod error;
pub mod ipc;
pub mod sync_service;
pub mod worker;

pub use controller::{FleetController, FleetControllerConfig, StrategyFactory};
pub use error::FleetError;
pub use sync_service::{SyncStats, TradeSyncService};
pub use worker::WorkerHandle;
