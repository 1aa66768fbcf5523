//! Mirror replication.
//!
//! Every segment and superblock write goes to all live mirrors in parallel.
//! A mirror that fails a write is declared failed and is neither written nor
//! read again for the life of the [`MirrorSet`].
//!
//! Reads enumerate mirror orders lexicographically. Each order's leading
//! mirror is consulted, at most once per request, until one returns bytes
//! the caller accepts.

use crate::error::{CoreError, CoreResult};
use ltf_storage::{StorageBackend, StorageResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Successful replication of one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Mirrors that acknowledged the write.
    pub acked: usize,
    /// Bytes written to each mirror.
    pub bytes: usize,
}

/// Some live mirrors did not acknowledge a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("partial replication: {acked} mirror(s) acknowledged, {} failed", failed.len())]
pub struct PartialReplicationError {
    /// Mirrors that acknowledged the write.
    pub acked: usize,
    /// Mirrors declared failed by this write.
    pub failed: Vec<usize>,
}

struct Mirror {
    backend: Mutex<Box<dyn StorageBackend>>,
    failed: AtomicBool,
}

impl Mirror {
    fn write_durable(&self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut backend = self.backend.lock();
        backend.write_at(offset, bytes)?;
        backend.sync()
    }
}

/// The replica devices of one partition.
pub struct MirrorSet {
    mirrors: Vec<Mirror>,
    try_all_permutations: bool,
}

impl MirrorSet {
    /// Creates a mirror set over `backends`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `backends` is empty.
    pub fn new(backends: Vec<Box<dyn StorageBackend>>, try_all_permutations: bool) -> CoreResult<Self> {
        if backends.is_empty() {
            return Err(CoreError::config("at least one mirror is required"));
        }
        let mirrors = backends
            .into_iter()
            .map(|backend| Mirror {
                backend: Mutex::new(backend),
                failed: AtomicBool::new(false),
            })
            .collect();
        Ok(Self {
            mirrors,
            try_all_permutations,
        })
    }

    /// Number of mirrors, failed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    /// Always false; a mirror set has at least one mirror.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Indices of mirrors that have not failed.
    #[must_use]
    pub fn live(&self) -> Vec<usize> {
        (0..self.mirrors.len())
            .filter(|&i| !self.is_failed(i))
            .collect()
    }

    /// Number of mirrors that have not failed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live().len()
    }

    /// Returns true if mirror `index` has been declared failed.
    #[must_use]
    pub fn is_failed(&self, index: usize) -> bool {
        self.mirrors
            .get(index)
            .map_or(true, |m| m.failed.load(Ordering::Acquire))
    }

    /// Returns true if any mirror has failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.mirrors.iter().any(|m| m.failed.load(Ordering::Acquire))
    }

    /// Declares mirror `index` failed.
    pub fn mark_failed(&self, index: usize) {
        if let Some(mirror) = self.mirrors.get(index) {
            if !mirror.failed.swap(true, Ordering::AcqRel) {
                warn!(mirror = index, "mirror declared failed");
            }
        }
    }

    /// Smallest capacity across all mirrors.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.mirrors
            .iter()
            .map(|m| m.backend.lock().capacity())
            .min()
            .unwrap_or(0)
    }

    /// Writes `bytes` at `offset` on every live mirror and syncs them.
    ///
    /// # Errors
    ///
    /// Returns [`PartialReplicationError`] if any live mirror failed the
    /// write (those mirrors are now declared failed) or no mirror is live.
    pub fn replicate_write(&self, offset: u64, bytes: &[u8]) -> Result<Ack, PartialReplicationError> {
        let live = self.live();
        if live.is_empty() {
            return Err(PartialReplicationError {
                acked: 0,
                failed: Vec::new(),
            });
        }

        let results: Vec<(usize, StorageResult<()>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = live
                .iter()
                .map(|&index| {
                    let mirror = &self.mirrors[index];
                    (index, scope.spawn(move || mirror.write_durable(offset, bytes)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(index, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(std::io::Error::new(std::io::ErrorKind::Other, "mirror writer panicked").into())
                    });
                    (index, result)
                })
                .collect()
        });

        let mut acked = 0;
        let mut failed = Vec::new();
        for (index, result) in results {
            match result {
                Ok(()) => acked += 1,
                Err(e) => {
                    warn!(mirror = index, offset, error = %e, "mirror write failed");
                    self.mark_failed(index);
                    failed.push(index);
                }
            }
        }

        if failed.is_empty() {
            Ok(Ack {
                acked,
                bytes: bytes.len(),
            })
        } else {
            Err(PartialReplicationError { acked, failed })
        }
    }

    /// Reads `len` bytes at `offset`, trying mirrors until `validate` accepts
    /// the bytes of one of them.
    ///
    /// # Errors
    ///
    /// Returns a corruption error naming `location` when no consulted mirror
    /// produced acceptable bytes.
    pub fn read_validated<T, F>(
        &self,
        location: &str,
        offset: u64,
        len: usize,
        mut validate: F,
    ) -> CoreResult<T>
    where
        F: FnMut(Vec<u8>) -> Result<T, String>,
    {
        let mut order = self.live();
        if order.is_empty() {
            return Err(CoreError::corruption(location, "no live mirror"));
        }
        if !self.try_all_permutations {
            order.truncate(1);
        }

        let mut consulted = vec![false; self.mirrors.len()];
        let mut last_failure = String::from("no mirror consulted");
        loop {
            let leader = order[0];
            if !consulted[leader] {
                consulted[leader] = true;
                match self.read_one(leader, offset, len) {
                    Ok(bytes) => match validate(bytes) {
                        Ok(value) => return Ok(value),
                        Err(reason) => {
                            debug!(mirror = leader, location, %reason, "mirror copy rejected");
                            last_failure = format!("mirror {leader}: {reason}");
                        }
                    },
                    Err(e) => {
                        debug!(mirror = leader, location, error = %e, "mirror read failed");
                        last_failure = format!("mirror {leader}: {e}");
                    }
                }
            }
            if !next_permutation(&mut order) {
                break;
            }
        }

        Err(CoreError::corruption(
            location,
            format!("no mirror holds a valid copy ({last_failure})"),
        ))
    }

    /// Reads `len` bytes at `offset` from every live mirror.
    pub fn read_all(&self, offset: u64, len: usize) -> Vec<(usize, StorageResult<Vec<u8>>)> {
        self.live()
            .into_iter()
            .map(|index| (index, self.read_one(index, offset, len)))
            .collect()
    }

    fn read_one(&self, index: usize, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.mirrors[index].backend.lock().read_at(offset, len)
    }
}

impl std::fmt::Debug for MirrorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSet")
            .field("mirrors", &self.mirrors.len())
            .field("live", &self.live())
            .field("try_all_permutations", &self.try_all_permutations)
            .finish()
    }
}

/// Rearranges `order` into the next lexicographic permutation.
///
/// Returns false (leaving `order` sorted ascending) after the last one.
fn next_permutation(order: &mut [usize]) -> bool {
    if order.len() < 2 {
        return false;
    }
    let mut i = order.len() - 1;
    while i > 0 && order[i - 1] >= order[i] {
        i -= 1;
    }
    if i == 0 {
        order.reverse();
        return false;
    }
    let mut j = order.len() - 1;
    while order[j] <= order[i - 1] {
        j -= 1;
    }
    order.swap(i - 1, j);
    order[i..].reverse();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltf_storage::InMemoryBackend;

    fn mirrors(n: usize) -> (Vec<InMemoryBackend>, MirrorSet) {
        let backends: Vec<InMemoryBackend> = (0..n).map(|_| InMemoryBackend::new(1024)).collect();
        let boxed = backends
            .iter()
            .map(|b| Box::new(b.clone()) as Box<dyn StorageBackend>)
            .collect();
        (backends, MirrorSet::new(boxed, true).unwrap())
    }

    #[test]
    fn permutations_are_lexicographic() {
        let mut order = vec![0, 1, 2];
        let mut seen = vec![order.clone()];
        while next_permutation(&mut order) {
            seen.push(order.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 1, 2],
                vec![0, 2, 1],
                vec![1, 0, 2],
                vec![1, 2, 0],
                vec![2, 0, 1],
                vec![2, 1, 0],
            ]
        );
    }

    #[test]
    fn write_reaches_every_mirror() {
        let (backends, set) = mirrors(3);
        let ack = set.replicate_write(10, b"abc").unwrap();
        assert_eq!(ack.acked, 3);
        for backend in &backends {
            assert_eq!(&backend.data()[10..13], b"abc");
        }
    }

    #[test]
    fn empty_mirror_set_is_rejected() {
        assert!(MirrorSet::new(Vec::new(), true).is_err());
    }

    #[test]
    fn write_failure_declares_mirror_failed() {
        let small = InMemoryBackend::new(8);
        let big = InMemoryBackend::new(1024);
        let set = MirrorSet::new(
            vec![Box::new(big.clone()), Box::new(small)],
            true,
        )
        .unwrap();

        let err = set.replicate_write(100, b"xyz").unwrap_err();
        assert_eq!(err.acked, 1);
        assert_eq!(err.failed, vec![1]);
        assert!(set.is_failed(1));
        assert!(set.is_degraded());

        // the failed mirror is no longer written
        let ack = set.replicate_write(200, b"xyz").unwrap();
        assert_eq!(ack.acked, 1);
    }

    #[test]
    fn read_falls_through_to_valid_mirror() {
        let (backends, set) = mirrors(3);
        set.replicate_write(0, b"good").unwrap();
        backends[0].poke(0, b"bad!");
        backends[1].poke(0, b"bad!");

        let mut consulted = 0;
        let value = set
            .read_validated("test", 0, 4, |bytes| {
                consulted += 1;
                if bytes == b"good" {
                    Ok(bytes)
                } else {
                    Err("bad copy".into())
                }
            })
            .unwrap();
        assert_eq!(value, b"good");
        assert_eq!(consulted, 3);
    }

    #[test]
    fn exhausted_permutations_are_corruption() {
        let (_backends, set) = mirrors(3);
        let mut consulted = 0;
        let err = set
            .read_validated("segment 4", 0, 4, |_| -> Result<(), String> {
                consulted += 1;
                Err("never valid".into())
            })
            .unwrap_err();
        assert!(err.is_corruption());
        // each mirror is read once even though six orders are enumerated
        assert_eq!(consulted, 3);
    }

    #[test]
    fn single_mirror_reads_without_permutations() {
        let backends: Vec<InMemoryBackend> = (0..2).map(|_| InMemoryBackend::new(64)).collect();
        let set = MirrorSet::new(
            backends
                .iter()
                .map(|b| Box::new(b.clone()) as Box<dyn StorageBackend>)
                .collect(),
            false,
        )
        .unwrap();
        set.replicate_write(0, b"good").unwrap();
        backends[0].poke(0, b"bad!");

        let result = set.read_validated("test", 0, 4, |bytes| {
            if bytes == b"good" {
                Ok(())
            } else {
                Err("bad".into())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn read_all_skips_failed_mirrors() {
        let (_backends, set) = mirrors(3);
        set.mark_failed(1);
        let indices: Vec<usize> = set.read_all(0, 4).into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
    }
}
