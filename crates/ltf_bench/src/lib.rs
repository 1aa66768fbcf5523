//! Benchmark utilities.

#![warn(missing_docs)]

use ltf_core::{JournalConfig, ObjectId, ObjectType, Owner, Partition, PartitionId};
use ltf_storage::{InMemoryBackend, StorageBackend};

/// Object type used by the benchmarks.
pub const BENCH_TYPE: ObjectType = ObjectType::new(1);

/// Generate deterministic object data of the specified size.
pub fn object_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Formats a partition over `mirrors` in-memory devices.
pub fn memory_partition(config: JournalConfig, mirrors: usize) -> Partition {
    let backends: Vec<Box<dyn StorageBackend>> = (0..mirrors)
        .map(|_| Box::new(InMemoryBackend::new(config.device_capacity())) as Box<dyn StorageBackend>)
        .collect();
    Partition::format(PartitionId::new(1), config, backends).expect("format failed")
}

/// Replaces `previous` with a fresh object of `size` bytes in one commit.
///
/// Replacing keeps old transactions dead, so the journal can wrap forever.
pub fn replace_object(partition: &Partition, previous: Option<ObjectId>, size: usize) -> ObjectId {
    let mut txn = partition.create_transaction(Owner::WriteBuffer);
    if let Some(id) = previous {
        txn.remove_object(id).expect("remove failed");
    }
    let id = txn
        .add_object(BENCH_TYPE, object_data(size))
        .expect("add failed");
    partition.commit(&mut txn).expect("commit failed");
    id
}
