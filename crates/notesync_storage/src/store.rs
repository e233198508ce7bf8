//! The local store: notes, pending changes and sync metadata.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use crate::record::Record;
use notesync_protocol::{DeadLetter, Document, PendingChange, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::path::Path;
use tracing::{debug, warn};

/// File name of the record log inside a store directory.
pub const LOG_FILE_NAME: &str = "notes.log";

/// Counters describing a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of documents.
    pub notes: usize,
    /// Number of pending changes.
    pub pending_changes: usize,
    /// Number of dead letters.
    pub dead_letters: usize,
    /// Size of the record log in bytes.
    pub log_bytes: u64,
    /// Last successful drain pass.
    pub last_sync: Option<Timestamp>,
}

/// Durable key-value persistence for the sync engine.
///
/// Three logical stores share one append-only record log:
///
/// - `notes`, keyed by document id, with secondary indexes on `updated_at`
///   and `user_id`
/// - `pending_changes`, keyed by an auto-increment id, with secondary
///   indexes on `note_id` and `enqueued_at`
/// - `sync_meta`, holding the single `lastSync` timestamp
///
/// plus a `dead_letters` log of dropped changes.
///
/// Every operation is atomic per key: it becomes exactly one record that is
/// appended and synced before the call returns, and the in-memory indexes
/// change only after the write succeeded. `put` is last-write-wins; ordering
/// between concurrent writers is the caller's concern.
pub struct LocalStore {
    inner: Mutex<Inner>,
}

struct Inner {
    backend: Box<dyn StorageBackend>,
    notes: BTreeMap<String, Document>,
    notes_by_updated: BTreeSet<(Timestamp, String)>,
    notes_by_user: HashMap<String, BTreeSet<String>>,
    changes: BTreeMap<u64, PendingChange>,
    changes_by_note: HashMap<String, BTreeSet<u64>>,
    changes_by_enqueued: BTreeSet<(Timestamp, u64)>,
    next_change_id: u64,
    last_sync: Option<Timestamp>,
    dead_letters: Vec<DeadLetter>,
}

impl LocalStore {
    /// Opens or creates a file-backed store in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be opened, is locked by another process, or
    /// is corrupted.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        let backend = FileBackend::open(&dir.join(LOG_FILE_NAME))?;
        Self::with_backend(Box::new(backend))
    }

    /// Creates an empty store that lives in memory only.
    pub fn in_memory() -> Self {
        Self::from_inner(Inner::new(Box::new(InMemoryBackend::new())))
    }

    /// Opens a store over an arbitrary backend, replaying its log.
    pub fn with_backend(backend: Box<dyn StorageBackend>) -> StorageResult<Self> {
        let mut inner = Inner::new(backend);
        inner.replay()?;
        debug!(
            notes = inner.notes.len(),
            pending = inner.changes.len(),
            next_change_id = inner.next_change_id,
            "local store opened"
        );
        Ok(Self::from_inner(inner))
    }

    fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    // ------------------------------------------------------------------
    // notes
    // ------------------------------------------------------------------

    /// Inserts or replaces a document.
    pub fn put(&self, doc: Document) -> StorageResult<()> {
        doc.validate()?;
        self.inner.lock().write(Record::PutNote(doc))
    }

    /// Returns the document with the given id.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.inner.lock().notes.get(id).cloned()
    }

    /// Returns all documents ordered by id.
    pub fn get_all(&self) -> Vec<Document> {
        self.inner.lock().notes.values().cloned().collect()
    }

    /// Removes a document. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if !inner.notes.contains_key(id) {
            return Ok(());
        }
        inner.write(Record::RemoveNote(id.to_string()))
    }

    /// Returns the documents owned by `user_id`.
    pub fn notes_by_user(&self, user_id: &str) -> Vec<Document> {
        let inner = self.inner.lock();
        inner
            .notes_by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.notes.get(id).cloned())
            .collect()
    }

    /// Returns documents updated at or after `since`, oldest first.
    pub fn notes_updated_since(&self, since: Timestamp) -> Vec<Document> {
        let inner = self.inner.lock();
        inner
            .notes_by_updated
            .range((since, String::new())..)
            .filter_map(|(_, id)| inner.notes.get(id).cloned())
            .collect()
    }

    // ------------------------------------------------------------------
    // pending changes
    // ------------------------------------------------------------------

    /// Appends a change at the tail of the log and returns its id.
    ///
    /// Any id already set on `change` is replaced. Ids are never reused,
    /// including after [`LocalStore::clear_changes`].
    pub fn append_change(&self, mut change: PendingChange) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let id = inner.next_change_id;
        change.id = id;
        inner.write(Record::AppendChange(change))?;
        Ok(id)
    }

    /// Returns every pending change in FIFO order.
    pub fn list_changes(&self) -> Vec<PendingChange> {
        self.inner.lock().changes.values().cloned().collect()
    }

    /// Removes a change. Removing an absent id is a no-op.
    pub fn remove_change(&self, id: u64) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if !inner.changes.contains_key(&id) {
            return Ok(());
        }
        inner.write(Record::RemoveChange(id))
    }

    /// Removes every pending change.
    pub fn clear_changes(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let Some(&up_to) = inner.changes.keys().next_back() else {
            return Ok(());
        };
        inner.write(Record::ClearChanges(up_to))
    }

    /// Returns the number of pending changes.
    pub fn change_count(&self) -> usize {
        self.inner.lock().changes.len()
    }

    /// Returns the id of the newest pending change.
    pub fn last_change_id(&self) -> Option<u64> {
        self.inner.lock().changes.keys().next_back().copied()
    }

    /// Returns the first change with `cursor < id <= up_to`.
    ///
    /// Walking the log with this cursor instead of re-listing it means rows
    /// appended after `up_to` was captured are never visited.
    pub fn next_change_after(&self, cursor: u64, up_to: u64) -> Option<PendingChange> {
        if cursor >= up_to {
            return None;
        }
        self.inner
            .lock()
            .changes
            .range((Bound::Excluded(cursor), Bound::Included(up_to)))
            .next()
            .map(|(_, change)| change.clone())
    }

    /// Returns the pending changes for one note in FIFO order.
    pub fn changes_for_note(&self, note_id: &str) -> Vec<PendingChange> {
        let inner = self.inner.lock();
        inner
            .changes_by_note
            .get(note_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.changes.get(id).cloned())
            .collect()
    }

    /// Returns when the oldest pending change was enqueued.
    pub fn oldest_pending(&self) -> Option<Timestamp> {
        self.inner
            .lock()
            .changes_by_enqueued
            .iter()
            .next()
            .map(|(ts, _)| *ts)
    }

    // ------------------------------------------------------------------
    // sync metadata and dead letters
    // ------------------------------------------------------------------

    /// Returns the time of the last successful drain pass.
    pub fn last_sync(&self) -> Option<Timestamp> {
        self.inner.lock().last_sync
    }

    /// Records the time of a successful drain pass.
    pub fn set_last_sync(&self, ts: Timestamp) -> StorageResult<()> {
        self.inner.lock().write(Record::SetLastSync(ts))
    }

    /// Records a change that was permanently dropped.
    pub fn record_dead_letter(&self, letter: DeadLetter) -> StorageResult<()> {
        self.inner.lock().write(Record::DeadLetter(letter))
    }

    /// Returns every dead letter, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().dead_letters.clone()
    }

    /// Returns store counters.
    pub fn stats(&self) -> StorageResult<StoreStats> {
        let inner = self.inner.lock();
        Ok(StoreStats {
            notes: inner.notes.len(),
            pending_changes: inner.changes.len(),
            dead_letters: inner.dead_letters.len(),
            log_bytes: inner.backend.size()?,
            last_sync: inner.last_sync,
        })
    }
}

impl Inner {
    fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            notes: BTreeMap::new(),
            notes_by_updated: BTreeSet::new(),
            notes_by_user: HashMap::new(),
            changes: BTreeMap::new(),
            changes_by_note: HashMap::new(),
            changes_by_enqueued: BTreeSet::new(),
            next_change_id: 1,
            last_sync: None,
            dead_letters: Vec::new(),
        }
    }

    fn replay(&mut self) -> StorageResult<()> {
        let size = self.backend.size()?;
        let mut offset = 0;
        while let Some((record, next)) = Record::read_at(self.backend.as_ref(), offset)? {
            self.apply(record);
            offset = next;
        }
        if offset < size {
            warn!(offset, size, "discarding torn record at end of log");
            self.backend.truncate(offset)?;
        }
        Ok(())
    }

    /// Appends the record durably, then applies it.
    fn write(&mut self, record: Record) -> StorageResult<()> {
        let bytes = record.encode()?;
        let before = self.backend.size()?;
        let written = self
            .backend
            .append(&bytes)
            .and_then(|_| self.backend.sync());
        if let Err(e) = written {
            if let Err(rollback) = self.backend.truncate(before) {
                warn!(error = %rollback, "failed to roll back partial record");
            }
            return Err(e);
        }
        self.apply(record);
        Ok(())
    }

    fn apply(&mut self, record: Record) {
        match record {
            Record::PutNote(doc) => {
                self.unindex_note(&doc.id);
                self.notes_by_updated.insert((doc.updated_at, doc.id.clone()));
                if let Some(user) = &doc.user_id {
                    self.notes_by_user
                        .entry(user.clone())
                        .or_default()
                        .insert(doc.id.clone());
                }
                self.notes.insert(doc.id.clone(), doc);
            }
            Record::RemoveNote(id) => {
                self.unindex_note(&id);
                self.notes.remove(&id);
            }
            Record::AppendChange(change) => {
                self.next_change_id = self.next_change_id.max(change.id + 1);
                self.changes_by_note
                    .entry(change.note_id.clone())
                    .or_default()
                    .insert(change.id);
                self.changes_by_enqueued
                    .insert((change.enqueued_at, change.id));
                self.changes.insert(change.id, change);
            }
            Record::RemoveChange(id) => self.remove_change_entry(id),
            Record::ClearChanges(up_to) => {
                let ids: Vec<u64> = self.changes.range(..=up_to).map(|(id, _)| *id).collect();
                for id in ids {
                    self.remove_change_entry(id);
                }
            }
            Record::SetLastSync(ts) => self.last_sync = Some(ts),
            Record::DeadLetter(letter) => self.dead_letters.push(letter),
        }
    }

    fn unindex_note(&mut self, id: &str) {
        let Some(old) = self.notes.get(id) else {
            return;
        };
        self.notes_by_updated.remove(&(old.updated_at, id.to_string()));
        if let Some(user) = &old.user_id {
            if let Some(ids) = self.notes_by_user.get_mut(user) {
                ids.remove(id);
                if ids.is_empty() {
                    self.notes_by_user.remove(user);
                }
            }
        }
    }

    fn remove_change_entry(&mut self, id: u64) {
        let Some(change) = self.changes.remove(&id) else {
            return;
        };
        self.changes_by_enqueued.remove(&(change.enqueued_at, id));
        if let Some(ids) = self.changes_by_note.get_mut(&change.note_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.changes_by_note.remove(&change.note_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use notesync_protocol::ChangeKind;

    fn note(id: &str, secs: i64) -> Document {
        Document::new(id, format!("title {id}"), "body")
            .with_updated_at(Utc.timestamp_opt(secs, 0).single().unwrap())
    }

    #[test]
    fn put_is_last_write_wins() {
        let store = LocalStore::in_memory();
        store.put(note("n1", 100)).unwrap();
        let mut newer = note("n1", 50);
        newer.content = "replaced".into();
        store.put(newer).unwrap();

        let got = store.get("n1").unwrap();
        assert_eq!(got.content, "replaced");
        assert_eq!(store.get_all().len(), 1);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn rejects_invalid_document() {
        let store = LocalStore::in_memory();
        assert!(store.put(note("", 1)).is_err());
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn changes_are_fifo_with_increasing_ids() {
        let store = LocalStore::in_memory();
        let a = store.append_change(PendingChange::create(note("a", 1))).unwrap();
        let b = store.append_change(PendingChange::update(note("b", 2))).unwrap();
        let c = store.append_change(PendingChange::update(note("a", 3))).unwrap();
        assert!(a < b && b < c);

        let ids: Vec<u64> = store.list_changes().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert_eq!(store.changes_for_note("a").len(), 2);

        store.remove_change(b).unwrap();
        store.remove_change(b).unwrap();
        assert_eq!(store.change_count(), 2);
    }

    #[test]
    fn cursor_stops_at_high_water_mark() {
        let store = LocalStore::in_memory();
        let first = store.append_change(PendingChange::create(note("a", 1))).unwrap();
        let high = store.append_change(PendingChange::create(note("b", 1))).unwrap();
        store.append_change(PendingChange::create(note("c", 1))).unwrap();

        let one = store.next_change_after(0, high).unwrap();
        assert_eq!(one.id, first);
        let two = store.next_change_after(one.id, high).unwrap();
        assert_eq!(two.id, high);
        assert!(store.next_change_after(two.id, high).is_none());
    }

    #[test]
    fn ids_are_not_reused_after_clear() {
        let store = LocalStore::in_memory();
        store.append_change(PendingChange::create(note("a", 1))).unwrap();
        let last = store.append_change(PendingChange::create(note("b", 1))).unwrap();
        store.clear_changes().unwrap();
        assert_eq!(store.change_count(), 0);
        assert!(store.last_change_id().is_none());

        let next = store.append_change(PendingChange::delete("a", None)).unwrap();
        assert!(next > last);
    }

    #[test]
    fn secondary_indexes_follow_updates() {
        let store = LocalStore::in_memory();
        store.put(note("a", 10).with_user_id("u1")).unwrap();
        store.put(note("b", 20).with_user_id("u1")).unwrap();
        store.put(note("c", 30).with_user_id("u2")).unwrap();

        assert_eq!(store.notes_by_user("u1").len(), 2);

        store.put(note("a", 40).with_user_id("u2")).unwrap();
        assert_eq!(store.notes_by_user("u1").len(), 1);
        assert_eq!(store.notes_by_user("u2").len(), 2);

        let since = Utc.timestamp_opt(25, 0).single().unwrap();
        let recent: Vec<String> = store
            .notes_updated_since(since)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(recent, vec!["c".to_string(), "a".to_string()]);

        store.remove("c").unwrap();
        assert_eq!(store.notes_by_user("u2").len(), 1);
    }

    #[test]
    fn oldest_pending_uses_enqueue_time() {
        let store = LocalStore::in_memory();
        assert!(store.oldest_pending().is_none());

        let mut old = PendingChange::create(note("a", 1));
        old.enqueued_at = old.enqueued_at - Duration::hours(1);
        let expected = old.enqueued_at;
        store.append_change(PendingChange::update(note("b", 1))).unwrap();
        store.append_change(old).unwrap();

        assert_eq!(store.oldest_pending(), Some(expected));
    }

    #[test]
    fn last_sync_and_dead_letters() {
        let store = LocalStore::in_memory();
        assert!(store.last_sync().is_none());

        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        store.set_last_sync(ts).unwrap();
        assert_eq!(store.last_sync(), Some(ts));

        let change = PendingChange::delete("n1", None);
        store
            .record_dead_letter(DeadLetter::new(change, "HTTP 400"))
            .unwrap();
        let letters = store.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].change.kind, ChangeKind::Delete);

        let stats = store.stats().unwrap();
        assert_eq!(stats.dead_letters, 1);
        assert_eq!(stats.last_sync, Some(ts));
        assert!(stats.log_bytes > 0);
    }
}
