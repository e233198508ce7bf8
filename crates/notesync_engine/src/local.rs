//! The editor-facing note API.
//!
//! Every write lands in the local store first and queues a pending change.
//! Nothing here touches the network.

use chrono::Duration;
use notesync_protocol::{now, ChangeKind, Document, PendingChange, Timestamp};
use notesync_storage::{LocalStore, StorageResult};
use std::sync::Arc;
use tracing::debug;

/// Local note operations backed by a [`LocalStore`].
#[derive(Clone)]
pub struct LocalNotes {
    store: Arc<LocalStore>,
}

impl LocalNotes {
    /// Creates the API over `store`.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Stores a new note and queues its creation.
    pub fn create_note(&self, draft: Document) -> StorageResult<Document> {
        self.write(draft, ChangeKind::Create)
    }

    /// Stores an edited note and queues the update.
    pub fn save_note(&self, doc: Document) -> StorageResult<Document> {
        self.write(doc, ChangeKind::Update)
    }

    /// Queues deletion of a note.
    ///
    /// The note stays in the local store until the server acknowledges the
    /// delete. Returns `false` if a delete for the note was already queued.
    pub fn delete_note(&self, id: &str) -> StorageResult<bool> {
        let queued = self
            .store
            .changes_for_note(id)
            .iter()
            .any(|c| c.kind == ChangeKind::Delete);
        if queued {
            debug!(note_id = id, "delete already queued");
            return Ok(false);
        }
        let snapshot = self.store.get(id);
        let change_id = self
            .store
            .append_change(PendingChange::delete(id, snapshot))?;
        debug!(note_id = id, change_id, "queued delete");
        Ok(true)
    }

    /// Returns a note by id.
    pub fn get_note(&self, id: &str) -> Option<Document> {
        self.store.get(id)
    }

    /// Returns every note, most recently updated first.
    pub fn all_notes(&self) -> Vec<Document> {
        let mut notes = self.store.get_all();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        notes
    }

    /// Case-insensitive search over title, content and tags.
    pub fn search_notes(&self, query: &str) -> Vec<Document> {
        let needle = query.to_lowercase();
        self.all_notes()
            .into_iter()
            .filter(|doc| {
                doc.title.to_lowercase().contains(&needle)
                    || doc.content.to_lowercase().contains(&needle)
                    || doc.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Returns the notes carrying `tag`.
    pub fn notes_by_tag(&self, tag: &str) -> Vec<Document> {
        self.all_notes()
            .into_iter()
            .filter(|doc| doc.tags.contains(tag))
            .collect()
    }

    /// Returns the number of queued changes.
    pub fn pending_count(&self) -> usize {
        self.store.change_count()
    }

    fn write(&self, mut doc: Document, kind: ChangeKind) -> StorageResult<Document> {
        let previous = self.store.get(&doc.id).map(|d| d.updated_at);
        doc.updated_at = next_stamp(previous);
        doc.pending_sync = true;
        doc.validate()?;

        self.store.put(doc.clone())?;
        let change_id = self
            .store
            .append_change(PendingChange::new(doc.id.clone(), kind, Some(doc.clone())))?;
        debug!(note_id = %doc.id, change_id, kind = %kind, "queued local write");
        Ok(doc)
    }
}

/// Returns now, nudged past `previous` so successive saves of one note
/// never share a timestamp.
fn next_stamp(previous: Option<Timestamp>) -> Timestamp {
    let stamp = now();
    match previous {
        Some(prev) if stamp <= prev => prev + Duration::milliseconds(1),
        _ => stamp,
    }
}
