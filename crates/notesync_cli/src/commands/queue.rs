//! Change log commands: pending, dead-letters.

use super::open_store;
use serde::Serialize;
use std::path::Path;

/// One pending change, summarized.
#[derive(Debug, Serialize)]
pub struct PendingEntry {
    /// Log position.
    pub id: u64,
    /// Target note.
    pub note_id: String,
    /// Change kind.
    pub kind: String,
    /// Enqueue time.
    pub enqueued_at: String,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Runs the pending command.
pub fn pending(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let entries: Vec<PendingEntry> = store
        .list_changes()
        .into_iter()
        .map(|change| PendingEntry {
            id: change.id,
            kind: change.kind.to_string(),
            enqueued_at: change.enqueued_at.to_rfc3339(),
            note_id: change.note_id,
            retry_count: change.retry_count,
            last_error: change.last_error,
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            println!("{} pending change(s)", entries.len());
            for entry in &entries {
                print!(
                    "  #{:<6} {:<7} {}  retries={}",
                    entry.id, entry.kind, entry.note_id, entry.retry_count
                );
                match &entry.last_error {
                    Some(err) => println!("  last error: {}", err),
                    None => println!(),
                }
            }
        }
    }

    Ok(())
}

/// Runs the dead-letters command.
pub fn dead_letters(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let letters = store.dead_letters();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&letters)?);
        }
        _ => {
            println!("{} dead letter(s)", letters.len());
            for letter in &letters {
                println!(
                    "  {} {} {}  after {} retries: {}",
                    letter.dropped_at.format("%Y-%m-%d %H:%M:%S"),
                    letter.change.kind,
                    letter.change.note_id,
                    letter.change.retry_count,
                    letter.reason
                );
            }
        }
    }

    Ok(())
}
