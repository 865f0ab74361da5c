//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same buffer, so a test can drop a ledger, "restart"
/// and reopen the very same bytes through another handle.
///
/// [`InMemoryBackend::crash_after`] arms a torn write: the next appends
/// store only the given number of bytes and then fail, which is what a
/// crash in the middle of a slot rewrite leaves behind.
///
/// # Example
///
/// ```rust
/// use clustertx_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let reopened = backend.clone();
/// backend.append(b"test data").unwrap();
/// assert_eq!(reopened.size().unwrap(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    crash_budget: Option<usize>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                data,
                crash_budget: None,
            })),
        }
    }

    /// Returns a copy of all stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.inner.read().data.clone()
    }

    /// Lets only `bytes` more bytes through before appends fail.
    pub fn crash_after(&self, bytes: usize) {
        self.inner.write().crash_budget = Some(bytes);
    }

    /// Disarms a pending torn write.
    pub fn recover(&self) {
        self.inner.write().crash_budget = None;
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let inner = self.inner.read();
        let size = inner.data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > inner.data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(inner.data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut inner = self.inner.write();
        let offset = inner.data.len() as u64;

        if let Some(budget) = inner.crash_budget {
            if new_data.len() > budget {
                inner.data.extend_from_slice(&new_data[..budget]);
                inner.crash_budget = Some(0);
                return Err(StorageError::WriteInterrupted { written: budget });
            }
            inner.crash_budget = Some(budget - new_data.len());
        }

        inner.data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.read().data.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let size = inner.data.len() as u64;

        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }

        inner.data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn memory_append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn memory_read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn clones_share_contents() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();
        writer.append(b"shared").unwrap();
        assert_eq!(reader.read_all().unwrap(), b"shared");
    }

    #[test]
    fn truncate_then_rewrite() {
        let mut backend = InMemoryBackend::with_data(b"old image".to_vec());
        backend.truncate(0).unwrap();
        backend.append(b"new").unwrap();
        assert_eq!(backend.data(), b"new");
    }

    #[test]
    fn truncate_past_end_fails() {
        let mut backend = InMemoryBackend::with_data(b"abc".to_vec());
        let result = backend.truncate(10);
        assert!(matches!(result, Err(StorageError::TruncatePastEnd { .. })));
    }

    #[test]
    fn crash_after_leaves_torn_write() {
        let mut backend = InMemoryBackend::new();
        backend.crash_after(4);

        let result = backend.append(b"abcdefgh");
        assert!(matches!(
            result,
            Err(StorageError::WriteInterrupted { written: 4 })
        ));
        assert_eq!(backend.data(), b"abcd");

        // Nothing else gets through until recovered.
        assert!(backend.append(b"x").is_err());
        backend.recover();
        backend.append(b"x").unwrap();
        assert_eq!(backend.data(), b"abcdx");
    }
}
