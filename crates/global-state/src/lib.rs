//! # Global State
//!
//! Layer-0 crate: a process-wide, read-mostly flag set consulted by side-effect
//! points elsewhere in the fleet.
//!
//! The source framework this was distilled from has a singleton `GlobalState`
//! object holding a back-reference to the fleet controller — a cyclic dependency.
//! That becomes a one-way relationship here:
//! the `FleetController` is the only writer (it recomputes the global-pause flag on
//! every worker transition and calls [`GlobalState::set_paused`]); every other
//! component only ever reads it through [`GlobalState::is_paused`]. There is no
//! handle pointing back at the controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheap, cloneable handle to the process-wide pause flag.
///
/// Construct one at process start with [`GlobalState::new`] and hand clones to
/// every component that needs to read it (the event bus, bot workers). The fleet
/// controller additionally uses [`GlobalState::set_paused`] to keep it current.
#[derive(Debug, Clone, Default)]
pub struct GlobalState {
    paused: Arc<AtomicBool>,
}

impl GlobalState {
    /// Creates a fresh, unpaused global state. Call once at process start; pass
    /// clones to every component, never a second independent instance.
    pub fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cheap, lock-free read of the global-pause flag.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Sets the global-pause flag. Only the fleet controller should call this,
    /// after recomputing it from the worker registry.
    pub fn set_paused(&self, paused: bool) {
        let previous = self.paused.swap(paused, Ordering::AcqRel);
        if previous != paused {
            tracing::info!(paused, "global pause flag changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unpaused() {
        let state = GlobalState::new();
        assert!(!state.is_paused());
    }

    #[test]
    fn clones_share_the_same_flag() {
        let state = GlobalState::new();
        let clone = state.clone();
        state.set_paused(true);
        assert!(clone.is_paused());
    }
}
