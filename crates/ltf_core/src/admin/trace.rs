//! Trace recording.

use super::AdminStatus;
use crate::types::PartitionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Journal events that can be recorded.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A transaction was committed.
    Commit {
        partition: PartitionId,
        txn_id: u64,
        sequence: u64,
        generation: u64,
        start_segment: u32,
        parts: u32,
        ondisk_bytes: u64,
        degraded: bool,
    },
    /// Live objects of an old transaction were relocated to the head.
    CopyForward {
        partition: PartitionId,
        from_txn: u64,
        to_txn: u64,
        objects: usize,
    },
    /// An old transaction's segments were reclaimed.
    Reclaim {
        partition: PartitionId,
        txn_id: u64,
        segments: u32,
    },
    /// A partition was recovered from its mirrors.
    Recovery {
        partition: PartitionId,
        head: u32,
        tail: u32,
        transactions: usize,
        dropped: usize,
        truncated_at: Option<u32>,
    },
    /// A mirror was declared failed.
    MirrorFailed {
        partition: PartitionId,
        mirror: usize,
    },
}

/// Control over trace capture.
pub trait TraceControl: Send + Sync {
    /// Starts recording events to `path` for `duration`, keeping a
    /// `sampling_rate` fraction of them.
    fn enable_trace_recording(
        &self,
        path: &Path,
        sampling_rate: f64,
        duration: Duration,
    ) -> AdminStatus;

    /// Returns true while an unexpired session records to `path`.
    fn is_recording(&self, path: &Path) -> bool;

    /// Offers an event to every active session.
    fn record(&self, event: &TraceEvent);
}

struct Session {
    path: PathBuf,
    file: File,
    sampling_rate: f64,
    credit: f64,
    expires_at: Instant,
}

impl Session {
    /// Deterministic sampling: keeps every event whose accumulated credit
    /// reaches one.
    fn sample(&mut self) -> bool {
        self.credit += self.sampling_rate;
        if self.credit >= 1.0 {
            self.credit -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Records sampled events as JSON lines.
#[derive(Default)]
pub struct FileTraceRecorder {
    sessions: Mutex<Vec<Session>>,
}

impl FileTraceRecorder {
    /// Creates a recorder with no session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn valid_path(path: &Path) -> bool {
        if path.as_os_str().is_empty() || path.is_dir() {
            return false;
        }
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
            _ => true,
        }
    }
}

impl TraceControl for FileTraceRecorder {
    fn enable_trace_recording(
        &self,
        path: &Path,
        sampling_rate: f64,
        duration: Duration,
    ) -> AdminStatus {
        if !Self::valid_path(path) {
            return AdminStatus::failed("Invalid file path");
        }
        if !(sampling_rate > 0.0 && sampling_rate <= 1.0) {
            return AdminStatus::failed("Invalid sampling rate");
        }
        if self.is_recording(path) {
            return AdminStatus::failed("Already recording to this file");
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open trace file");
                return AdminStatus::failed("Invalid file path");
            }
        };

        self.sessions.lock().push(Session {
            path: path.to_path_buf(),
            file,
            sampling_rate,
            credit: 0.0,
            expires_at: Instant::now() + duration,
        });
        info!(path = %path.display(), sampling_rate, ?duration, "trace recording started");
        AdminStatus::success("Trace recording started")
    }

    fn is_recording(&self, path: &Path) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.expires_at > now);
        sessions.iter().any(|s| s.path == path)
    }

    fn record(&self, event: &TraceEvent) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.expires_at > now);
        if sessions.is_empty() {
            return;
        }

        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "cannot serialize trace event");
                return;
            }
        };
        for session in sessions.iter_mut() {
            if session.sample() {
                if let Err(e) = writeln!(session.file, "{line}") {
                    warn!(path = %session.path.display(), error = %e, "trace write failed");
                }
            }
        }
    }
}
