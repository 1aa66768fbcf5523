//! Administrative surface.
//!
//! Everything here is in-process. An [`AdminService`] holds an explicit
//! registry of partitions; there is no process-wide instance. A transport
//! (RPC, CLI) can wrap it without the journal knowing about it.

mod service;
mod trace;

pub use service::{AdminService, DEFAULT_DUMP_BUDGET};
pub use trace::{FileTraceRecorder, TraceControl, TraceEvent};

use crate::journal::{JournalEntry, SegmentState};
use crate::partition::PartitionMode;
use crate::types::{GenerationId, PartitionId, SegmentId, SequenceNumber};
use serde::{Deserialize, Serialize};

/// Machine-checkable outcome of an admin request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// The request succeeded.
    Success,
    /// The request failed; see the status text.
    Failed,
}

/// Outcome of an admin request with a human-readable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStatus {
    /// Outcome.
    pub code: StatusCode,
    /// Description.
    pub text: String,
}

impl AdminStatus {
    /// Creates a success status.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Success,
            text: text.into(),
        }
    }

    /// Creates a failure status.
    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Failed,
            text: text.into(),
        }
    }

    /// Returns true for [`StatusCode::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

/// Mirror health in a dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStatus {
    /// Number of mirrors.
    pub total: usize,
    /// Mirrors still written and read.
    pub live: Vec<usize>,
}

/// Snapshot of a partition's journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalDump {
    /// Partition.
    pub partition: PartitionId,
    /// Operating mode.
    pub mode: PartitionMode,
    /// Current generation.
    pub generation: GenerationId,
    /// Next sequence number to be assigned.
    pub next_sequence: SequenceNumber,
    /// Next segment to be written.
    pub head: SegmentId,
    /// Oldest live segment.
    pub tail: SegmentId,
    /// Segments in the ring.
    pub segment_count: u32,
    /// Segment size in bytes.
    pub segment_size: u32,
    /// State of every segment.
    pub segments: Vec<SegmentState>,
    /// Committed transactions, oldest first.
    pub transactions: Vec<JournalEntry>,
    /// Live objects.
    pub object_count: usize,
    /// Mirror health.
    pub mirrors: MirrorStatus,
}
