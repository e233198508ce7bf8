//! # NoteSync Storage
//!
//! Durable local persistence for the note sync engine.
//!
//! The [`LocalStore`] keeps notes, the pending-change log, sync metadata and
//! dead letters in one append-only record log. Underneath it sits a
//! [`StorageBackend`], an opaque byte store that knows nothing of records.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral stores
//! - [`FileBackend`] - A single exclusively locked log file
//!
//! ## Example
//!
//! ```rust
//! use notesync_protocol::{Document, PendingChange};
//! use notesync_storage::LocalStore;
//!
//! let store = LocalStore::in_memory();
//! let doc = Document::new("n1", "Groceries", "eggs");
//! store.put(doc.clone()).unwrap();
//! let id = store.append_change(PendingChange::create(doc)).unwrap();
//! assert_eq!(store.list_changes()[0].id, id);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod record;
mod store;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use record::{compute_crc32, RECORD_MAGIC, RECORD_VERSION};
pub use store::{LocalStore, StoreStats, LOG_FILE_NAME};
