//! Error types for LTF core.

use crate::format::FormatError;
use crate::mirror::PartialReplicationError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in journal, transaction and recovery operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage device error.
    #[error("storage error: {0}")]
    Storage(#[from] ltf_storage::StorageError),

    /// A header failed to decode outside of a recovery scan.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Checksum or magic mismatch; the data must not be interpreted.
    #[error("corruption in {location}: {message}")]
    Corruption {
        /// What was being read (superblock, segment id).
        location: String,
        /// Description of the failed check.
        message: String,
    },

    /// The next allocation would overtake the tail.
    #[error("journal full: {requested} segment(s) requested, {free} free")]
    JournalFull {
        /// Segments the caller needed.
        requested: u32,
        /// Segments free at the time of the request.
        free: u32,
    },

    /// Fewer mirrors than required acknowledged a write.
    #[error(transparent)]
    PartialReplication(#[from] PartialReplicationError),

    /// A step of a commit failed after allocation; nothing was committed.
    #[error("commit failed: {reason}")]
    Commit {
        /// What failed.
        reason: String,
    },

    /// No usable superblock; the journal cannot be reconstructed.
    #[error("recovery failed: {reason}")]
    Recovery {
        /// Why recovery could not proceed.
        reason: String,
    },

    /// The commit was cancelled before segment allocation began.
    #[error("commit cancelled before allocation")]
    Cancelled,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The journal configuration is unusable.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corruption(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corruption {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Creates a commit error.
    pub fn commit(reason: impl Into<String>) -> Self {
        Self::Commit {
            reason: reason.into(),
        }
    }

    /// Creates a recovery error.
    pub fn recovery(reason: impl Into<String>) -> Self {
        Self::Recovery {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` for checksum/magic failures, including codec failures.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. } | Self::Format(_))
    }
}
