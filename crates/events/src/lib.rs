//! # Events
//!
//! In-process publish/subscribe bus for bot lifecycle, signal, and trade events.
//! Thread-safe, keyed by a fixed [`core_types::EventType`] enumeration, with a
//! bounded circular history and pause-aware suppression of a handful of event
//! types while the fleet is globally paused.

pub mod bus;
pub mod error;

pub use bus::{Callback, EventBus};
pub use error::EventsError;
