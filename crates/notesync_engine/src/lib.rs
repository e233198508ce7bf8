//! # NoteSync Engine
//!
//! Offline-first synchronization for NoteSync.
//!
//! This crate provides:
//! - [`LocalNotes`], the editor-facing API that writes locally and queues
//!   pending changes
//! - [`SyncEngine`], which drains the pending-change log against a server
//! - [`resolve`], last-writer-wins conflict resolution with a textual merge
//!   on equal timestamps
//! - [`Backoff`], exponential backoff with jitter
//! - [`NetworkMonitor`], connectivity streams and a health probe
//! - [`NoteTransport`] over HTTP ([`HttpTransport`]) or in memory
//!   ([`MockTransport`])
//!
//! ## Key Invariants
//!
//! - Local writes never wait for the network
//! - Changes reach the server in enqueue order within one pass
//! - At most one drain pass runs at a time
//! - Changes queued during a pass wait for the next one
//! - `last_sync` moves only after a pass that processed every change
//! - A change is re-queued at most `max_retries` times, then dead-lettered

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod config;
mod conflict;
mod engine;
mod error;
mod http;
mod local;
mod network;
mod observe;
mod transport;

pub use backoff::{compute_delay, is_retryable, Backoff, RetryState};
pub use config::{NetworkConfig, RetryConfig, SyncConfig};
pub use conflict::{resolve, Resolution, Strategy};
pub use engine::{DrainReport, SyncEngine, SyncPhase, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpRequest, HttpResponse, HttpTransport, Method, ReqwestClient};
pub use local::LocalNotes;
pub use network::{ConnectionInfo, ConnectionSource, Latency, ManualConnection, NetworkMonitor, NetworkState};
pub use observe::Subscription;
pub use transport::{MockCall, MockFailure, MockTransport, NoteTransport};
