//! # NoteSync Protocol
//!
//! Data model shared by the NoteSync local store and sync engine.
//!
//! This crate provides:
//! - [`Document`], the note entity and its JSON wire form
//! - [`PendingChange`] and [`ChangeKind`] for the pending-change log
//! - [`DeadLetter`] for changes dropped after exhausting their retries
//! - Millisecond-precision [`Timestamp`] helpers
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod document;
mod error;
mod time;

pub use change::{ChangeKind, DeadLetter, PendingChange};
pub use document::{changed_fields, Document};
pub use error::{ProtocolError, ProtocolResult};
pub use time::{now, Timestamp};
