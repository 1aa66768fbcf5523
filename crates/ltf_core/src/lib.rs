//! # LTF Core
//!
//! Replicated write-ahead journal for a persistent object store.
//!
//! This crate provides:
//! - On-disk codecs for the superblock, segment headers and transaction headers
//! - A checksum-framed segment store over a set of mirrored devices
//! - The circular journal (head/tail bookkeeping, copy-forward compaction)
//! - Synchronous, atomic multi-part transaction commit
//! - Crash recovery and a corruption-injection harness for testing it
//! - The administrative surface (journal dumps, trace recording, mode queries)
//!
//! Everything is scoped to a [`Partition`]: one logical journal with its own
//! mirrors, counters and object index. There is no process-wide state.
//!
//! ```rust
//! use ltf_core::{JournalConfig, ObjectType, Owner, Partition, PartitionId};
//! use ltf_storage::{InMemoryBackend, StorageBackend};
//!
//! let config = JournalConfig::new().segment_count(8).segment_size(4096);
//! let mirrors: Vec<Box<dyn StorageBackend>> = (0..2)
//!     .map(|_| Box::new(InMemoryBackend::new(config.device_capacity())) as Box<dyn StorageBackend>)
//!     .collect();
//!
//! let partition = Partition::format(PartitionId::new(1), config, mirrors).unwrap();
//! let mut txn = partition.create_transaction(Owner::WriteBuffer);
//! let id = txn.add_object(ObjectType::new(1), b"payload".to_vec()).unwrap();
//! partition.commit(&mut txn).unwrap();
//! assert_eq!(partition.get_object(id).unwrap().payload, b"payload");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
mod cancel;
mod compaction;
mod config;
pub mod corruption;
mod error;
pub mod format;
pub mod journal;
pub mod mirror;
mod object;
mod partition;
pub mod recovery;
pub mod segment;
pub mod transaction;
mod types;

pub use cancel::CancellationToken;
pub use config::JournalConfig;
pub use corruption::{
    CorruptionMode, CorruptionState, CorruptionTarget, SegmentField, SuperblockField,
    TransactionField,
};
pub use error::{CoreError, CoreResult};
pub use format::{FormatError, SegmentHeader, Superblock, TransactionHeader};
pub use journal::{Journal, JournalEntry, SegmentRange, SegmentState};
pub use mirror::{Ack, MirrorSet, PartialReplicationError};
pub use object::{Object, ObjectIndex};
pub use partition::{Partition, PartitionMode, RecoveryReport};
pub use recovery::{recover, DroppedTransaction, RecoveredState, RecoveredTransaction};
pub use segment::SegmentStore;
pub use transaction::{CommitOutcome, CommitStatus, Transaction, TransactionState};
pub use types::{
    GenerationId, ObjectId, ObjectType, Owner, PartitionId, SegmentId, SequenceNumber,
    TransactionId,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
