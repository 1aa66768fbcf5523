//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage device.
///
/// The device is zero-filled at creation. Clones share the same underlying
/// buffer, which is how tests simulate a process restart: keep a clone,
/// drop the partition, and reopen it over the clone.
///
/// # Example
///
/// ```rust
/// use ltf_storage::{StorageBackend, InMemoryBackend};
///
/// let mut device = InMemoryBackend::new(64);
/// let survivor = device.clone();
/// device.write_at(0, b"test data").unwrap();
/// assert_eq!(survivor.read_at(0, 9).unwrap(), b"test data");
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a zero-filled device of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self::with_data(vec![0u8; capacity as usize])
    }

    /// Creates a device with pre-existing contents.
    ///
    /// Useful for testing recovery from hand-crafted images.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all data in the device.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites bytes directly, bypassing the trait.
    ///
    /// Tests use this to damage durable state behind the journal's back.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside the device.
    pub fn poke(&self, offset: u64, bytes: &[u8]) {
        let mut data = self.data.write();
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let capacity = data.len() as u64;

        if StorageError::out_of_bounds(offset, len, capacity) {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                capacity,
            });
        }

        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let capacity = data.len() as u64;

        if StorageError::out_of_bounds(offset, bytes.len(), capacity) {
            return Err(StorageError::WritePastEnd {
                offset,
                len: bytes.len(),
                capacity,
            });
        }

        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.data.read().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_zeroed() {
        let device = InMemoryBackend::new(16);
        assert_eq!(device.capacity(), 16);
        assert_eq!(device.read_at(0, 16).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn memory_write_then_read() {
        let mut device = InMemoryBackend::new(32);
        device.write_at(4, b"hello").unwrap();
        device.write_at(9, b" world").unwrap();

        assert_eq!(device.read_at(4, 11).unwrap(), b"hello world");
        assert_eq!(device.read_at(0, 4).unwrap(), vec![0u8; 4]);
    }

    #[test]
    fn memory_overwrite_in_place() {
        let mut device = InMemoryBackend::new(8);
        device.write_at(0, b"aaaaaaaa").unwrap();
        device.write_at(2, b"bb").unwrap();
        assert_eq!(device.read_at(0, 8).unwrap(), b"aabbaaaa");
    }

    #[test]
    fn memory_read_past_end_fails() {
        let device = InMemoryBackend::new(8);
        let result = device.read_at(6, 4);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn memory_write_past_end_fails() {
        let mut device = InMemoryBackend::new(8);
        let result = device.write_at(u64::MAX, b"x");
        assert!(matches!(result, Err(StorageError::WritePastEnd { .. })));
        assert_eq!(device.data(), vec![0u8; 8]);
    }

    #[test]
    fn memory_clones_share_data() {
        let mut device = InMemoryBackend::new(8);
        let other = device.clone();
        device.write_at(0, b"shared").unwrap();
        assert_eq!(other.read_at(0, 6).unwrap(), b"shared");
    }

    #[test]
    fn memory_poke_bypasses_trait() {
        let device = InMemoryBackend::new(4);
        device.poke(1, &[0xFF]);
        assert_eq!(device.data(), vec![0, 0xFF, 0, 0]);
    }

    #[test]
    fn memory_empty_read() {
        let device = InMemoryBackend::new(4);
        assert!(device.read_at(4, 0).unwrap().is_empty());
    }
}
