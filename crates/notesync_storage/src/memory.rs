//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A storage backend that keeps the record log in a byte vector.
///
/// Used by [`crate::LocalStore::in_memory`] for tests and ephemeral stores.
/// [`InMemoryBackend::with_data`] lets tests replay a hand-crafted or
/// deliberately damaged log.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-filled with `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::ReadPastEnd {
                offset: new_size,
                len: 0,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_are_contiguous() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"NSLG").unwrap(), 0);
        assert_eq!(backend.append(b"record").unwrap(), 4);
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_at(4, 6).unwrap(), b"record");
    }

    #[test]
    fn read_past_end_is_an_error() {
        let backend = InMemoryBackend::with_data(b"short".to_vec());
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { size: 5, .. })
        ));
    }

    #[test]
    fn truncate_cuts_torn_tail() {
        let mut backend = InMemoryBackend::with_data(b"whole|torn".to_vec());
        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"whole");
        assert!(backend.truncate(50).is_err());
    }
}
