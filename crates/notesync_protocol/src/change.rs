//! Pending changes and dead letters.

use crate::document::Document;
use crate::time::{now, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The note was created locally.
    Create,
    /// The note was edited locally.
    Update,
    /// The note was deleted locally.
    Delete,
}

impl ChangeKind {
    /// Returns true for kinds that upsert the document on the server.
    pub fn is_upsert(&self) -> bool {
        matches!(self, ChangeKind::Create | ChangeKind::Update)
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unconfirmed local mutation awaiting server acknowledgment.
///
/// `id` is assigned by the store when the change is appended; a change
/// that has not been appended yet carries `id == 0`. The log is FIFO by `id`.
///
/// `payload` is the document as it was when the change was enqueued. Its
/// `updated_at` is the local base timestamp that the sync engine compares
/// with the server copy to detect divergence. A delete carries the last
/// local snapshot when one existed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    /// Log position, assigned on append.
    pub id: u64,
    /// Target note.
    pub note_id: String,
    /// Kind of mutation.
    pub kind: ChangeKind,
    /// Document snapshot at enqueue time.
    pub payload: Option<Document>,
    /// When the change was first enqueued.
    pub enqueued_at: Timestamp,
    /// Number of failed sync attempts so far.
    pub retry_count: u32,
    /// Reason for the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingChange {
    /// Creates a change for `note_id` that has not been appended yet.
    pub fn new(note_id: impl Into<String>, kind: ChangeKind, payload: Option<Document>) -> Self {
        Self {
            id: 0,
            note_id: note_id.into(),
            kind,
            payload,
            enqueued_at: now(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// Creates a create change carrying `doc`.
    pub fn create(doc: Document) -> Self {
        Self::new(doc.id.clone(), ChangeKind::Create, Some(doc))
    }

    /// Creates an update change carrying `doc`.
    pub fn update(doc: Document) -> Self {
        Self::new(doc.id.clone(), ChangeKind::Update, Some(doc))
    }

    /// Creates a delete change, optionally carrying the last local snapshot.
    pub fn delete(note_id: impl Into<String>, snapshot: Option<Document>) -> Self {
        Self::new(note_id, ChangeKind::Delete, snapshot)
    }

    /// Returns the local `updated_at` recorded at enqueue time.
    pub fn base_updated_at(&self) -> Option<Timestamp> {
        self.payload.as_ref().map(|doc| doc.updated_at)
    }

    /// Returns the copy to re-append after a retryable failure.
    ///
    /// The copy keeps `enqueued_at`, increments `retry_count`, and is reset
    /// to `id == 0` so the store assigns it a fresh tail position.
    pub fn requeued(&self, error: impl Into<String>) -> Self {
        Self {
            id: 0,
            retry_count: self.retry_count + 1,
            last_error: Some(error.into()),
            ..self.clone()
        }
    }
}

/// A change permanently dropped after a non-retryable failure or after
/// exhausting its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// The dropped change.
    pub change: PendingChange,
    /// Why it was dropped.
    pub reason: String,
    /// When it was dropped.
    pub dropped_at: Timestamp,
}

impl DeadLetter {
    /// Creates a dead letter stamped with the current time.
    pub fn new(change: PendingChange, reason: impl Into<String>) -> Self {
        Self {
            change,
            reason: reason.into(),
            dropped_at: now(),
        }
    }
}
