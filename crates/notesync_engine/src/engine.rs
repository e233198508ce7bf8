//! The sync orchestrator.
//!
//! A drain pass walks the pending-change log in FIFO order up to the
//! high-water id captured at entry. Each change is reconciled with the
//! server copy, pushed, and then removed, re-queued or dead-lettered.

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::conflict::{resolve, Strategy};
use crate::error::{SyncError, SyncResult};
use crate::observe::{Observable, Subscription};
use crate::transport::NoteTransport;
use notesync_protocol::{now, ChangeKind, DeadLetter, Document, PendingChange, Timestamp};
use notesync_storage::LocalStore;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not draining.
    Idle,
    /// A drain pass is running.
    Syncing,
    /// The last pass processed every change.
    Completed,
    /// The last pass was aborted by a local failure.
    Error,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Syncing => "syncing",
            SyncPhase::Completed => "completed",
            SyncPhase::Error => "error",
        })
    }
}

/// Observable sync status. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current phase.
    pub phase: SyncPhase,
    /// Changes processed in the current or last pass.
    pub progress: usize,
    /// Changes in the current or last pass.
    pub total: usize,
    /// Last successful pass.
    pub last_sync: Option<Timestamp>,
    /// Why the last pass aborted.
    pub error: Option<String>,
}

impl SyncStatus {
    fn idle(last_sync: Option<Timestamp>) -> Self {
        Self {
            phase: SyncPhase::Idle,
            progress: 0,
            total: 0,
            last_sync,
            error: None,
        }
    }
}

/// What one drain pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Changes visited.
    pub processed: usize,
    /// Changes settled with the server, pushed or superseded.
    pub pushed: usize,
    /// Changes re-queued after a transient failure.
    pub requeued: usize,
    /// Changes moved to the dead-letter log.
    pub dropped: usize,
    /// Notes whose server copy diverged, with the strategy applied.
    pub conflicts: Vec<(String, Strategy)>,
}

/// Drains the pending-change log against a server.
pub struct SyncEngine<T: NoteTransport> {
    store: Arc<LocalStore>,
    transport: T,
    config: SyncConfig,
    backoff: Backoff,
    status: Observable<SyncStatus>,
}

impl<T: NoteTransport> SyncEngine<T> {
    /// Creates an engine. The status starts `Idle`.
    pub fn new(config: SyncConfig, store: Arc<LocalStore>, transport: T) -> Self {
        let last_sync = store.last_sync();
        Self {
            backoff: Backoff::new(config.retry.clone()),
            status: Observable::new(SyncStatus::idle(last_sync)),
            store,
            transport,
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.status.get()
    }

    /// Stream of every status update, starting with the current one.
    pub fn subscribe_status(&self) -> Subscription<SyncStatus> {
        self.status.subscribe()
    }

    /// Runs one drain pass.
    ///
    /// Returns `None` without touching anything when a pass is already
    /// running or the log is empty.
    pub async fn sync_now(&self) -> Option<DrainReport> {
        let up_to = self.store.last_change_id()?;
        let total = self.store.change_count();

        let started = self.status.try_update(|current| {
            (current.phase != SyncPhase::Syncing).then(|| SyncStatus {
                phase: SyncPhase::Syncing,
                progress: 0,
                total,
                last_sync: current.last_sync,
                error: None,
            })
        });
        if !started {
            debug!("drain already running");
            return None;
        }

        info!(total, up_to, "sync started");
        let mut report = DrainReport::default();
        let outcome = self.drain(up_to, &mut report).await;
        let outcome = outcome.and_then(|()| {
            let finished = now();
            self.store.set_last_sync(finished)?;
            Ok(finished)
        });

        let current = self.status.get();
        match outcome {
            Ok(finished) => {
                info!(
                    processed = report.processed,
                    pushed = report.pushed,
                    requeued = report.requeued,
                    dropped = report.dropped,
                    "sync completed"
                );
                self.status.set(SyncStatus {
                    phase: SyncPhase::Completed,
                    progress: current.progress,
                    total: current.total,
                    last_sync: Some(finished),
                    error: None,
                });
                self.status.set(SyncStatus::idle(Some(finished)));
            }
            Err(e) => {
                error!(error = %e, "sync aborted");
                self.status.set(SyncStatus {
                    phase: SyncPhase::Error,
                    error: Some(e.to_string()),
                    ..current.clone()
                });
                self.status.set(SyncStatus {
                    error: Some(e.to_string()),
                    ..SyncStatus::idle(current.last_sync)
                });
            }
        }
        Some(report)
    }

    async fn drain(&self, up_to: u64, report: &mut DrainReport) -> SyncResult<()> {
        let mut cursor = 0;
        while let Some(change) = self.store.next_change_after(cursor, up_to) {
            cursor = change.id;
            match self.process(&change, report).await {
                Ok(()) => report.pushed += 1,
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => self.handle_failure(&change, e, report)?,
            }
            report.processed += 1;

            let current = self.status.get();
            self.status.set(SyncStatus {
                progress: current.progress + 1,
                ..current
            });
        }
        Ok(())
    }

    async fn process(&self, change: &PendingChange, report: &mut DrainReport) -> SyncResult<()> {
        let server = self.transport.fetch(&change.note_id).await?;
        match change.kind {
            ChangeKind::Create | ChangeKind::Update => self.apply_upsert(change, server, report).await,
            ChangeKind::Delete => self.apply_delete(change, server, report).await,
        }
    }

    async fn apply_upsert(
        &self,
        change: &PendingChange,
        server: Option<Document>,
        report: &mut DrainReport,
    ) -> SyncResult<()> {
        let local = change.payload.clone().ok_or_else(|| {
            SyncError::Decode(format!("{} change {} has no payload", change.kind, change.id))
        })?;

        let (doc, strategy) = match server {
            Some(server) if server.updated_at != local.updated_at => {
                let resolution = resolve(&server, &local, now());
                info!(
                    note_id = %change.note_id,
                    strategy = %resolution.strategy,
                    local_fields = resolution.local_changes.len(),
                    server_fields = resolution.server_changes.len(),
                    "resolved conflict"
                );
                report
                    .conflicts
                    .push((change.note_id.clone(), resolution.strategy));
                (resolution.resolved, Some(resolution.strategy))
            }
            _ => (local, None),
        };

        // The server already holds a copy that won.
        let pushed = strategy != Some(Strategy::Server);
        if pushed {
            self.push(&doc).await?;
        }
        debug!(note_id = %change.note_id, change_id = change.id, pushed, "change applied");

        self.persist_resolved(doc, change)?;
        self.store.remove_change(change.id)?;
        Ok(())
    }

    async fn apply_delete(
        &self,
        change: &PendingChange,
        server: Option<Document>,
        report: &mut DrainReport,
    ) -> SyncResult<()> {
        if let (Some(server), Some(local)) = (server, change.payload.as_ref()) {
            if server.updated_at != local.updated_at {
                let resolution = resolve(&server, local, now());
                report
                    .conflicts
                    .push((change.note_id.clone(), resolution.strategy));
                if resolution.strategy == Strategy::Server {
                    info!(note_id = %change.note_id, "server edit supersedes delete");
                    self.persist_resolved(resolution.resolved, change)?;
                    self.store.remove_change(change.id)?;
                    return Ok(());
                }
            }
        }

        let (result, retry) = self
            .backoff
            .retry(|| self.transport.delete(&change.note_id))
            .await;
        result?;
        debug!(note_id = %change.note_id, attempts = retry.attempts, "deleted on server");

        self.store.remove(&change.note_id)?;
        self.store.remove_change(change.id)?;
        Ok(())
    }

    async fn push(&self, doc: &Document) -> SyncResult<()> {
        let (result, retry) = self.backoff.retry(|| self.transport.push(doc)).await;
        if retry.attempts > 1 {
            debug!(
                note_id = %doc.id,
                attempts = retry.attempts,
                delay_ms = retry.last_delay.as_millis() as u64,
                "push needed retries"
            );
        }
        result
    }

    /// Stores the acknowledged copy unless the user has edited the note
    /// since `change` was queued; that edit has its own queued change.
    fn persist_resolved(&self, mut doc: Document, change: &PendingChange) -> SyncResult<()> {
        if let (Some(current), Some(base)) = (self.store.get(&doc.id), change.base_updated_at()) {
            if current.updated_at > base {
                debug!(note_id = %doc.id, "newer local edit queued; keeping it");
                return Ok(());
            }
        }
        doc.pending_sync = false;
        self.store.put(doc)?;
        Ok(())
    }

    fn handle_failure(
        &self,
        change: &PendingChange,
        error: SyncError,
        report: &mut DrainReport,
    ) -> SyncResult<()> {
        if error.is_retryable() && change.retry_count < self.config.retry.max_retries {
            let requeued = change.requeued(error.to_string());
            let retry_count = requeued.retry_count;
            let new_id = self.store.append_change(requeued)?;
            self.store.remove_change(change.id)?;
            warn!(
                note_id = %change.note_id,
                change_id = change.id,
                new_id,
                retry_count,
                error = %error,
                "change re-queued"
            );
            report.requeued += 1;
        } else {
            error!(
                note_id = %change.note_id,
                change_id = change.id,
                retry_count = change.retry_count,
                error = %error,
                "change dropped"
            );
            self.store
                .record_dead_letter(DeadLetter::new(change.clone(), error.to_string()))?;
            self.store.remove_change(change.id)?;
            report.dropped += 1;
        }
        Ok(())
    }

    /// Drives the three triggers: coming online, the periodic timer while
    /// online, and manual requests.
    ///
    /// Runs until the task is dropped.
    pub async fn run(&self, mut online: Subscription<bool>, mut manual: UnboundedReceiver<()>) {
        let mut interval = time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.reset();

        let mut is_online = false;
        let mut online_open = true;
        let mut manual_open = true;

        loop {
            tokio::select! {
                changed = online.recv(), if online_open => match changed {
                    Some(true) if !is_online => {
                        is_online = true;
                        info!("online; starting sync");
                        self.sync_now().await;
                    }
                    Some(now_online) => is_online = now_online,
                    None => online_open = false,
                },
                _ = interval.tick() => {
                    if is_online {
                        self.sync_now().await;
                    }
                }
                request = manual.recv(), if manual_open => match request {
                    Some(()) => {
                        self.sync_now().await;
                    }
                    None => manual_open = false,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::{MockFailure, MockTransport};

    fn engine() -> SyncEngine<Arc<MockTransport>> {
        SyncEngine::new(
            SyncConfig::new("http://test").with_retry(RetryConfig::no_delay()),
            Arc::new(LocalStore::in_memory()),
            Arc::new(MockTransport::new()),
        )
    }

    #[tokio::test]
    async fn empty_log_is_a_no_op() {
        let engine = engine();
        assert!(engine.sync_now().await.is_none());
        assert_eq!(engine.status().phase, SyncPhase::Idle);
        assert!(engine.store.last_sync().is_none());
        assert!(engine.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn create_is_pushed_and_acknowledged() {
        let engine = engine();
        let doc = Document::new("n1", "T", "B");
        engine.store.put(doc.clone()).unwrap();
        engine.store.append_change(PendingChange::create(doc)).unwrap();

        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert!(report.conflicts.is_empty());
        assert_eq!(engine.store.change_count(), 0);
        assert!(!engine.store.get("n1").unwrap().pending_sync);
        assert!(engine.transport.note("n1").is_some());

        let status = engine.status();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert_eq!(status.last_sync, engine.store.last_sync());
    }

    #[tokio::test]
    async fn missing_payload_is_dropped() {
        let engine = engine();
        engine
            .store
            .append_change(PendingChange::new("n1", ChangeKind::Update, None))
            .unwrap();

        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(engine.store.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_a_change_failure() {
        let engine = engine();
        let doc = Document::new("n1", "T", "B");
        engine.store.append_change(PendingChange::update(doc)).unwrap();
        engine.transport.fail_fetch(1, MockFailure::Status(502));

        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(engine.store.list_changes()[0].retry_count, 1);
        assert_eq!(engine.transport.push_count(), 0);
    }
}
