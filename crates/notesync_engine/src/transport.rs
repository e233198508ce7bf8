//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use notesync_protocol::Document;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// A note transport talks to the server's note resource.
///
/// This trait abstracts the network layer so the orchestrator can run
/// against HTTP ([`crate::HttpTransport`]) or an in-memory server
/// ([`MockTransport`]).
#[async_trait]
pub trait NoteTransport: Send + Sync {
    /// Fetches the server copy. `Ok(None)` means the server has no such
    /// note; any other failure is an error.
    async fn fetch(&self, id: &str) -> SyncResult<Option<Document>>;

    /// Creates or replaces the server copy.
    async fn push(&self, doc: &Document) -> SyncResult<()>;

    /// Deletes the server copy. Deleting an absent note succeeds.
    async fn delete(&self, id: &str) -> SyncResult<()>;
}

#[async_trait]
impl<T: NoteTransport + ?Sized> NoteTransport for Arc<T> {
    async fn fetch(&self, id: &str) -> SyncResult<Option<Document>> {
        (**self).fetch(id).await
    }

    async fn push(&self, doc: &Document) -> SyncResult<()> {
        (**self).push(doc).await
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        (**self).delete(id).await
    }
}

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `GET /notes/{id}`.
    Fetch(String),
    /// `PUT /notes/{id}`.
    Push(String),
    /// `DELETE /notes/{id}`.
    Delete(String),
}

/// A scripted failure for [`MockTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Connection-level failure.
    Network,
    /// Request timeout.
    Timeout,
    /// Server answered with this status.
    Status(u16),
}

impl MockFailure {
    fn to_error(self) -> SyncError {
        match self {
            MockFailure::Network => SyncError::Network("connection refused".into()),
            MockFailure::Timeout => SyncError::Timeout,
            MockFailure::Status(status) => SyncError::http(status, "scripted failure"),
        }
    }
}

type PushHook = Box<dyn Fn(&Document) + Send + Sync>;

/// An in-memory note server for tests.
///
/// Holds server copies by id, records every call, and fails calls on
/// demand: while offline every call fails with a network error, and
/// scripted failures are consumed one per matching call.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    push_hook: Mutex<Option<PushHook>>,
}

#[derive(Default)]
struct MockState {
    notes: BTreeMap<String, Document>,
    calls: Vec<MockCall>,
    offline: bool,
    fetch_failures: VecDeque<MockFailure>,
    push_failures: VecDeque<MockFailure>,
    delete_failures: VecDeque<MockFailure>,
}

impl MockTransport {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a server copy without recording a call.
    pub fn insert(&self, doc: Document) {
        self.state.lock().notes.insert(doc.id.clone(), doc);
    }

    /// Returns the server copy.
    pub fn note(&self, id: &str) -> Option<Document> {
        self.state.lock().notes.get(id).cloned()
    }

    /// Returns the number of notes on the server.
    pub fn note_count(&self) -> usize {
        self.state.lock().notes.len()
    }

    /// Makes every call fail with a network error while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Fails the next `times` fetches.
    pub fn fail_fetch(&self, times: usize, failure: MockFailure) {
        self.state
            .lock()
            .fetch_failures
            .extend(std::iter::repeat(failure).take(times));
    }

    /// Fails the next `times` pushes.
    pub fn fail_push(&self, times: usize, failure: MockFailure) {
        self.state
            .lock()
            .push_failures
            .extend(std::iter::repeat(failure).take(times));
    }

    /// Fails the next `times` deletes.
    pub fn fail_delete(&self, times: usize, failure: MockFailure) {
        self.state
            .lock()
            .delete_failures
            .extend(std::iter::repeat(failure).take(times));
    }

    /// Runs `hook` before every push is applied.
    pub fn on_push(&self, hook: impl Fn(&Document) + Send + Sync + 'static) {
        *self.push_hook.lock() = Some(Box::new(hook));
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the number of pushes made so far.
    pub fn push_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Push(_)))
            .count()
    }
}

impl MockState {
    fn begin(&mut self, call: MockCall) -> SyncResult<()> {
        let failure = match &call {
            MockCall::Fetch(_) => self.fetch_failures.pop_front(),
            MockCall::Push(_) => self.push_failures.pop_front(),
            MockCall::Delete(_) => self.delete_failures.pop_front(),
        };
        self.calls.push(call);
        if self.offline {
            return Err(MockFailure::Network.to_error());
        }
        failure.map_or(Ok(()), |f| Err(f.to_error()))
    }
}

#[async_trait]
impl NoteTransport for MockTransport {
    async fn fetch(&self, id: &str) -> SyncResult<Option<Document>> {
        let mut state = self.state.lock();
        state.begin(MockCall::Fetch(id.to_string()))?;
        Ok(state.notes.get(id).cloned())
    }

    async fn push(&self, doc: &Document) -> SyncResult<()> {
        self.state.lock().begin(MockCall::Push(doc.id.clone()))?;
        if let Some(hook) = self.push_hook.lock().as_ref() {
            hook(doc);
        }
        self.state.lock().notes.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let mut state = self.state.lock();
        state.begin(MockCall::Delete(id.to_string()))?;
        state.notes.remove(id);
        Ok(())
    }
}
