//! Fault injection below the journal.
//!
//! [`FaultyBackend`] wraps an in-memory device and fails or garbles I/O on
//! command. Unlike the journal's corruption harness, which alters what the
//! journal reads, these faults reach the device interface itself, which is
//! what replication and mirror-failure tests need.

use ltf_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Switches shared between a test and its [`FaultyBackend`].
#[derive(Debug)]
pub struct FaultControl {
    fail_writes: AtomicBool,
    writes_before_failure: AtomicUsize,
    writes: AtomicUsize,
    fail_sync: AtomicBool,
    garble_reads: AtomicBool,
}

impl Default for FaultControl {
    fn default() -> Self {
        Self {
            fail_writes: AtomicBool::new(false),
            writes_before_failure: AtomicUsize::new(usize::MAX),
            writes: AtomicUsize::new(0),
            fail_sync: AtomicBool::new(false),
            garble_reads: AtomicBool::new(false),
        }
    }
}

impl FaultControl {
    /// Creates a control with every fault off.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lets `count` more writes succeed, then fails the rest.
    pub fn fail_after_writes(&self, count: usize) {
        self.writes.store(0, Ordering::SeqCst);
        self.writes_before_failure.store(count, Ordering::SeqCst);
    }

    /// Makes `sync` fail.
    pub fn set_fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Flips the first byte of every read.
    pub fn set_garble_reads(&self, garble: bool) {
        self.garble_reads.store(garble, Ordering::SeqCst);
    }

    /// Turns every fault off.
    pub fn reset(&self) {
        self.fail_writes.store(false, Ordering::SeqCst);
        self.writes_before_failure.store(usize::MAX, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.fail_sync.store(false, Ordering::SeqCst);
        self.garble_reads.store(false, Ordering::SeqCst);
    }

    fn admit_write(&self) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        let done = self.writes.fetch_add(1, Ordering::SeqCst);
        done < self.writes_before_failure.load(Ordering::SeqCst)
    }
}

/// An in-memory device whose I/O can be made to fail.
#[derive(Debug, Clone)]
pub struct FaultyBackend {
    inner: InMemoryBackend,
    control: Arc<FaultControl>,
}

impl FaultyBackend {
    /// Wraps `inner`; faults are driven through `control`.
    #[must_use]
    pub fn new(inner: InMemoryBackend, control: Arc<FaultControl>) -> Self {
        Self { inner, control }
    }

    /// The wrapped device.
    #[must_use]
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }
}

fn injected(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, format!("injected {what} failure")))
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut data = self.inner.read_at(offset, len)?;
        if self.control.garble_reads.load(Ordering::SeqCst) {
            if let Some(first) = data.first_mut() {
                *first ^= 0xFF;
            }
        }
        Ok(data)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if !self.control.admit_write() {
            return Err(injected("write"));
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.control.fail_sync.load(Ordering::SeqCst) {
            return Err(injected("sync"));
        }
        self.inner.sync()
    }

    fn capacity(&self) -> u64 {
        self.inner.capacity()
    }
}
