//! File-based IPC surface (spec.md §6): a command queue consumers write to and
//! the controller drains, and a state snapshot the controller writes and
//! consumers (dashboards) poll.

use core_types::{CommandMessage, FleetStateSnapshot};
use std::path::Path;

pub const COMMANDS_FILE: &str = "bots_commands.json";
pub const STATE_FILE: &str = "bots_state.json";

/// Drains the command queue file as an atomic take: read then delete. Returns
/// an empty list if the file doesn't exist. Malformed JSON is tolerated by
/// deleting the file and logging a warning rather than propagating an error,
/// since a single corrupt write from a consumer must not wedge the queue.
pub fn take_commands(path: &Path) -> Vec<CommandMessage> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read command queue");
            return Vec::new();
        }
    };

    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(error = %e, path = %path.display(), "failed to delete command queue after take");
    }

    match serde_json::from_str::<Vec<CommandMessage>>(&contents) {
        Ok(commands) => commands,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "malformed command queue, discarding");
            Vec::new()
        }
    }
}

/// Writes the fleet state snapshot, truncating any previous contents.
/// Readers must tolerate empty or partial reads racing this write.
pub fn write_state_snapshot(path: &Path, snapshot: &FleetStateSnapshot) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}
