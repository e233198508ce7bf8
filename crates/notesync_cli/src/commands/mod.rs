//! CLI command implementations.

pub mod notes;
pub mod queue;
pub mod status;
pub mod sync;

use notesync_storage::LocalStore;
use std::path::Path;
use std::sync::Arc;

/// Opens the store in `dir`, creating the directory if needed.
pub fn open_store(dir: &Path) -> Result<Arc<LocalStore>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    Ok(Arc::new(LocalStore::open(dir)?))
}

/// Formats an optional timestamp for text output.
pub fn format_time(ts: Option<notesync_protocol::Timestamp>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_protocol::{Document, PendingChange};
    use tempfile::tempdir;

    #[test]
    fn open_store_creates_the_directory_and_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store");

        let store = open_store(&path).unwrap();
        store
            .append_change(PendingChange::create(Document::new("n1", "T", "B")))
            .unwrap();
        drop(store);

        let store = open_store(&path).unwrap();
        assert_eq!(store.change_count(), 1);
    }

    #[test]
    fn missing_timestamp_reads_never() {
        assert_eq!(format_time(None), "never");
    }
}
