//! Status command implementation.

use super::{format_time, open_store};
use notesync_protocol::Timestamp;
use serde::Serialize;
use std::path::Path;

/// Store status.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Store directory.
    pub path: String,
    /// Number of notes.
    pub notes: usize,
    /// Number of pending changes.
    pub pending_changes: usize,
    /// Number of dead letters.
    pub dead_letters: usize,
    /// Record log size in bytes.
    pub log_bytes: u64,
    /// Enqueue time of the oldest pending change.
    pub oldest_pending: Option<Timestamp>,
    /// Last successful sync.
    pub last_sync: Option<Timestamp>,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let stats = store.stats()?;

    let result = StatusResult {
        path: path.display().to_string(),
        notes: stats.notes,
        pending_changes: stats.pending_changes,
        dead_letters: stats.dead_letters,
        log_bytes: stats.log_bytes,
        oldest_pending: store.oldest_pending(),
        last_sync: stats.last_sync,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Store: {}", result.path);
            println!("  Notes:           {}", result.notes);
            println!("  Pending changes: {}", result.pending_changes);
            println!("  Dead letters:    {}", result.dead_letters);
            println!("  Log size:        {} bytes", result.log_bytes);
            println!("  Oldest pending:  {}", format_time(result.oldest_pending));
            println!("  Last sync:       {}", format_time(result.last_sync));
        }
    }

    Ok(())
}
