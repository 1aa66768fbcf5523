//! Partition fixtures.
//!
//! Provides journals over in-memory or file-backed mirrors that can be
//! dropped and reopened, which is how tests simulate a crash and restart.

use ltf_core::format::SUPERBLOCK_REGION_SIZE;
use ltf_core::{
    CommitStatus, JournalConfig, ObjectId, ObjectType, Owner, Partition, PartitionId, SegmentId,
};
use ltf_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::PathBuf;
use tempfile::TempDir;

/// Partition id used by fixtures.
pub const TEST_PARTITION: PartitionId = PartitionId::new(1);

/// Object type used by fixture helpers.
pub const TEST_OBJECT_TYPE: ObjectType = ObjectType::new(7);

/// Ten 1 KiB segments, small enough to fill in a few commits.
#[must_use]
pub fn small_config() -> JournalConfig {
    JournalConfig::new().segment_count(10).segment_size(1024)
}

/// Deterministic payload of `len` bytes derived from `seed`.
#[must_use]
pub fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// Byte offset of segment `id` on a device formatted with `config`.
#[must_use]
pub fn segment_offset(config: &JournalConfig, id: SegmentId) -> u64 {
    SUPERBLOCK_REGION_SIZE + u64::from(id) * u64::from(config.segment_size)
}

/// A partition over in-memory mirrors.
///
/// The fixture keeps its own clone of every mirror, so the data outlives
/// the partition and [`TestPartition::restart`] can reopen it.
pub struct TestPartition {
    /// The open partition.
    pub partition: Partition,
    mirrors: Vec<InMemoryBackend>,
    config: JournalConfig,
}

impl TestPartition {
    /// Formats `mirror_count` fresh mirrors with `config`.
    ///
    /// # Panics
    ///
    /// Panics if formatting fails.
    #[must_use]
    pub fn new(config: JournalConfig, mirror_count: usize) -> Self {
        let mirrors: Vec<InMemoryBackend> = (0..mirror_count)
            .map(|_| InMemoryBackend::new(config.device_capacity()))
            .collect();
        let partition = Partition::format(TEST_PARTITION, config.clone(), boxed(&mirrors))
            .expect("Failed to format test partition");
        Self {
            partition,
            mirrors,
            config,
        }
    }

    /// Drops the partition and reopens it from the mirrors.
    ///
    /// # Panics
    ///
    /// Panics if recovery fails.
    pub fn restart(&mut self) {
        self.partition = self
            .try_reopen(self.config.clone())
            .expect("Failed to reopen test partition");
    }

    /// Opens a second partition over the same mirrors with `config`.
    ///
    /// # Errors
    ///
    /// Returns whatever [`Partition::open`] returns.
    pub fn try_reopen(&self, config: JournalConfig) -> ltf_core::CoreResult<Partition> {
        Partition::open(TEST_PARTITION, config, boxed(&self.mirrors))
    }

    /// Mirror `index`, sharing data with the partition.
    #[must_use]
    pub fn mirror(&self, index: usize) -> &InMemoryBackend {
        &self.mirrors[index]
    }

    /// Configuration the fixture was formatted with.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Commits `count` transactions, each adding one object of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if a commit fails.
    pub fn commit_objects(&self, count: usize, size: usize) -> Vec<ObjectId> {
        (0..count)
            .map(|i| {
                let (_, ids) = self.commit_sizes(&[size], i as u64);
                ids[0]
            })
            .collect()
    }

    /// Commits one transaction adding an object per entry of `sizes`.
    ///
    /// Payloads are derived from `seed` and the object's position.
    ///
    /// # Panics
    ///
    /// Panics if the commit fails.
    pub fn commit_sizes(&self, sizes: &[usize], seed: u64) -> (CommitStatus, Vec<ObjectId>) {
        let mut txn = self.partition.create_transaction(Owner::WriteBuffer);
        let ids = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                txn.add_object(TEST_OBJECT_TYPE, payload(seed * 1000 + i as u64, size))
                    .expect("Failed to add object")
            })
            .collect();
        let status = self.partition.commit(&mut txn).expect("Commit failed");
        (status, ids)
    }

    /// Inverts `len` bytes of segment `id` on mirror `index`, behind the
    /// partition's back.
    ///
    /// # Panics
    ///
    /// Panics if the range lies outside the device.
    pub fn damage_segment(&self, index: usize, id: SegmentId, offset_in_segment: u64, len: usize) {
        let offset = segment_offset(&self.config, id) + offset_in_segment;
        let mirror = &self.mirrors[index];
        let flipped: Vec<u8> = mirror
            .read_at(offset, len)
            .expect("Damage range outside device")
            .iter()
            .map(|b| b ^ 0xFF)
            .collect();
        mirror.poke(offset, &flipped);
    }
}

impl std::ops::Deref for TestPartition {
    type Target = Partition;

    fn deref(&self) -> &Self::Target {
        &self.partition
    }
}

fn boxed(mirrors: &[InMemoryBackend]) -> Vec<Box<dyn StorageBackend>> {
    mirrors
        .iter()
        .map(|m| Box::new(m.clone()) as Box<dyn StorageBackend>)
        .collect()
}

/// Mirrors stored as files in a temporary directory.
pub struct FileMirrors {
    dir: TempDir,
    paths: Vec<PathBuf>,
}

impl FileMirrors {
    /// Creates `count` zero-filled mirror files sized for `config`.
    ///
    /// # Panics
    ///
    /// Panics if a file cannot be created.
    #[must_use]
    pub fn create(config: &JournalConfig, count: usize) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let paths: Vec<PathBuf> = (0..count)
            .map(|i| dir.path().join(format!("mirror-{i}.ltf")))
            .collect();
        for path in &paths {
            FileBackend::create(path, config.device_capacity())
                .expect("Failed to create mirror file");
        }
        Self { dir, paths }
    }

    /// Opens every mirror file.
    ///
    /// # Panics
    ///
    /// Panics if a file cannot be opened.
    #[must_use]
    pub fn backends(&self) -> Vec<Box<dyn StorageBackend>> {
        self.paths
            .iter()
            .map(|p| {
                Box::new(FileBackend::open(p).expect("Failed to open mirror file"))
                    as Box<dyn StorageBackend>
            })
            .collect()
    }

    /// Paths of the mirror files.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Directory holding the files.
    #[must_use]
    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_deterministic() {
        assert_eq!(payload(3, 64), payload(3, 64));
        assert_ne!(payload(3, 64), payload(4, 64));
    }

    #[test]
    fn fixture_restarts() {
        let mut fixture = TestPartition::new(small_config(), 2);
        let ids = fixture.commit_objects(2, 100);
        fixture.restart();
        assert_eq!(fixture.object_count(), 2);
        assert_eq!(fixture.get_object(ids[1]).unwrap().payload, payload(1000, 100));
    }

    #[test]
    fn file_mirrors_reopen() {
        let config = small_config();
        let files = FileMirrors::create(&config, 2);
        let id = {
            let partition = Partition::format(TEST_PARTITION, config.clone(), files.backends()).unwrap();
            let mut txn = partition.create_transaction(Owner::WriteBuffer);
            let id = txn.add_object(TEST_OBJECT_TYPE, b"on disk".to_vec()).unwrap();
            partition.commit(&mut txn).unwrap();
            id
        };
        let partition = Partition::open(TEST_PARTITION, config, files.backends()).unwrap();
        assert_eq!(partition.get_object(id).unwrap().payload, b"on disk");
    }
}
