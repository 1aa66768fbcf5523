//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the device.
    #[error("read beyond end of device: offset {offset}, len {len}, capacity {capacity}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The device capacity.
        capacity: u64,
    },

    /// Attempted to write beyond the end of the device.
    #[error("write beyond end of device: offset {offset}, len {len}, capacity {capacity}")]
    WritePastEnd {
        /// The requested write offset.
        offset: u64,
        /// The requested write length.
        len: usize,
        /// The device capacity.
        capacity: u64,
    },
}

impl StorageError {
    /// Returns `true` when `offset..offset+len` lies outside `capacity`.
    pub(crate) fn out_of_bounds(offset: u64, len: usize, capacity: u64) -> bool {
        offset
            .checked_add(len as u64)
            .map_or(true, |end| end > capacity)
    }
}
