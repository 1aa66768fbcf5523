//! Storage backend trait definition.

use crate::error::StorageResult;

/// A fixed-capacity, byte-addressable storage device.
///
/// One backend is one replica target. The journal lays out a superblock
/// region followed by a ring of segments on it and always writes whole
/// segments; the backend itself does not enforce any alignment.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes last written at that range
///   (zeroes for never-written ranges)
/// - Ranges outside `0..capacity()` are rejected, never silently extended
/// - `sync` ensures all previously written data is durable
/// - Backends must be `Send + Sync` so mirrors can be written in parallel
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the device capacity or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`, overwriting what was there.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the device capacity or
    /// an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// A write is only considered acknowledged by the journal after this
    /// returns successfully.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the total addressable size of the device in bytes.
    fn capacity(&self) -> u64;
}
