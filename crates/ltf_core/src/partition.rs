//! Partition: one logical journal and everything it owns.

use crate::admin::{JournalDump, MirrorStatus, TraceControl, TraceEvent};
use crate::cancel::CancellationToken;
use crate::config::JournalConfig;
use crate::corruption::{CorruptionMode, CorruptionTarget};
use crate::error::{CoreError, CoreResult};
use crate::format::{Superblock, SEGMENT_HEADER_SIZE, SUPERBLOCK_REGION_SIZE};
use crate::journal::{Journal, SegmentState};
use crate::mirror::MirrorSet;
use crate::object::{Object, ObjectIndex};
use crate::recovery::{recover, DroppedTransaction, RecoveredState};
use crate::segment::SegmentStore;
use crate::transaction::{CommitStatus, Counters, Transaction, TransactionManager};
use crate::types::{GenerationId, ObjectId, Owner, PartitionId, SegmentId, SequenceNumber};
use ltf_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Operating mode of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMode {
    /// Every mirror is healthy.
    Normal,
    /// A mirror failed or history was overwritten; commits still proceed.
    Degraded,
    /// Only administrative work is accepted.
    ServiceOnly,
}

/// What recovery found when the partition was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Head after recovery.
    pub head: SegmentId,
    /// Tail after recovery.
    pub tail: SegmentId,
    /// Transactions replayed.
    pub transactions: usize,
    /// Transactions skipped because a part was damaged.
    pub dropped: Vec<DroppedTransaction>,
    /// Where the scan stopped early, if it did.
    pub truncated_at: Option<SegmentId>,
}

/// One journal: its mirrors, head/tail state, counters and object index.
///
/// There is no shared state between partitions.
pub struct Partition {
    id: PartitionId,
    config: JournalConfig,
    store: Arc<SegmentStore>,
    journal: Arc<Journal>,
    objects: Arc<ObjectIndex>,
    manager: TransactionManager,
    report: RecoveryReport,
    service_only: AtomicBool,
}

impl Partition {
    /// Formats `mirrors` as an empty journal and opens it.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, a mirror too small for it, or a
    /// write that not every mirror acknowledged.
    pub fn format(
        id: PartitionId,
        config: JournalConfig,
        mirrors: Vec<Box<dyn StorageBackend>>,
    ) -> CoreResult<Self> {
        let store = Self::build_store(&config, mirrors)?;

        // stale headers from an earlier format must not look like segments
        let blank = [0u8; SEGMENT_HEADER_SIZE];
        for segment in 0..config.segment_count {
            let offset = SUPERBLOCK_REGION_SIZE + u64::from(segment) * u64::from(config.segment_size);
            store.mirrors().replicate_write(offset, &blank)?;
        }
        store.write_superblock(&Superblock::fresh(config.segment_count, config.segment_size))?;
        info!(partition = %id, segments = config.segment_count, size = config.segment_size, "journal formatted");

        Self::from_store(id, config, store)
    }

    /// Opens a formatted journal, recovering its state.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, or if recovery finds no valid
    /// superblock or a geometry different from `config`.
    pub fn open(
        id: PartitionId,
        config: JournalConfig,
        mirrors: Vec<Box<dyn StorageBackend>>,
    ) -> CoreResult<Self> {
        let store = Self::build_store(&config, mirrors)?;
        Self::from_store(id, config, store)
    }

    fn build_store(
        config: &JournalConfig,
        mirrors: Vec<Box<dyn StorageBackend>>,
    ) -> CoreResult<SegmentStore> {
        config.validate()?;
        let mirrors = MirrorSet::new(mirrors, config.try_all_mirror_permutations)?;
        SegmentStore::new(mirrors, config.segment_count, config.segment_size)
    }

    fn from_store(id: PartitionId, config: JournalConfig, store: SegmentStore) -> CoreResult<Self> {
        let state = recover(&store, &config)?;
        let report = RecoveryReport {
            head: state.head,
            tail: state.tail,
            transactions: state.transactions.len(),
            dropped: state.dropped,
            truncated_at: state.truncated_at,
        };

        let store = Arc::new(store);
        let journal = Arc::new(Journal::restored(
            config.segment_count,
            state.head,
            state.tail,
            state.entries,
        ));
        let objects = Arc::new(state.objects);
        let manager = TransactionManager::new(
            id,
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&journal),
            Arc::clone(&objects),
            Counters {
                next_txid: state.next_txid.as_u64(),
                next_sequence: state.next_sequence.as_u64(),
                generation: state.generation.as_u64(),
            },
        );

        Ok(Self {
            id,
            config,
            store,
            journal,
            objects,
            manager,
            report,
            service_only: AtomicBool::new(false),
        })
    }

    /// Partition id.
    #[must_use]
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Configuration the partition was opened with.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Begins a transaction on behalf of `owner`.
    pub fn create_transaction(&self, owner: Owner) -> Transaction {
        self.manager.begin(owner)
    }

    /// Commits `txn`. See [`TransactionManager::commit`].
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit`]. In service-only mode only
    /// [`Owner::Admin`] transactions are accepted.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<CommitStatus> {
        self.commit_with_cancel(txn, &CancellationToken::new())
    }

    /// Commits `txn`, honoring `cancel` until segments are allocated.
    ///
    /// # Errors
    ///
    /// See [`Partition::commit`].
    pub fn commit_with_cancel(
        &self,
        txn: &mut Transaction,
        cancel: &CancellationToken,
    ) -> CoreResult<CommitStatus> {
        if self.service_only.load(Ordering::Acquire) && txn.owner() != Owner::Admin {
            return Err(CoreError::invalid_operation(format!(
                "{} is in service-only mode",
                self.id
            )));
        }
        self.manager.commit(txn, cancel)
    }

    /// Returns a committed object.
    #[must_use]
    pub fn get_object(&self, id: ObjectId) -> Option<Object> {
        self.objects.get(id)
    }

    /// Ids of all live objects, sorted.
    #[must_use]
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.ids()
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Next segment to be written.
    #[must_use]
    pub fn head(&self) -> SegmentId {
        self.journal.head()
    }

    /// Oldest live segment.
    #[must_use]
    pub fn tail(&self) -> SegmentId {
        self.journal.tail()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> GenerationId {
        self.manager.generation()
    }

    /// Sequence number of the next commit.
    #[must_use]
    pub fn next_sequence(&self) -> SequenceNumber {
        self.manager.next_sequence()
    }

    /// Segments between tail and head.
    #[must_use]
    pub fn segments_in_use(&self) -> u32 {
        self.journal.live_segments()
    }

    /// Most segments that can be live at once.
    #[must_use]
    pub fn usable_segment_count(&self) -> u32 {
        self.journal.usable_segment_count()
    }

    /// State of segment `id`.
    #[must_use]
    pub fn segment_state(&self, id: SegmentId) -> Option<SegmentState> {
        self.journal.segment_state(id)
    }

    /// The replica devices.
    #[must_use]
    pub fn mirrors(&self) -> &MirrorSet {
        self.store.mirrors()
    }

    /// What recovery found when the partition was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    /// Alters every later read of `target`. Durable bytes are untouched.
    pub fn inject_corruption(&self, target: CorruptionTarget, mode: CorruptionMode) {
        self.store.corruption().inject(target, mode);
    }

    /// Restores normal reads.
    pub fn clear_corruption(&self) {
        self.store.corruption().clear();
    }

    /// Runs recovery against the mirrors as they read now, without changing
    /// the partition.
    ///
    /// # Errors
    ///
    /// See [`recover`].
    pub fn recover_snapshot(&self) -> CoreResult<RecoveredState> {
        recover(&self.store, &self.config)
    }

    /// Current operating mode.
    #[must_use]
    pub fn mode(&self) -> PartitionMode {
        if self.service_only.load(Ordering::Acquire) {
            PartitionMode::ServiceOnly
        } else if self.store.mirrors().is_degraded() || self.manager.lost_history() {
            PartitionMode::Degraded
        } else {
            PartitionMode::Normal
        }
    }

    /// Enters or leaves service-only mode.
    pub fn set_service_only(&self, enabled: bool) {
        self.service_only.store(enabled, Ordering::Release);
        info!(partition = %self.id, enabled, "service-only mode changed");
    }

    /// Sends journal events to `recorder`, starting with a summary of the
    /// recovery that opened the partition.
    pub fn attach_trace(&self, recorder: Arc<dyn TraceControl>) {
        recorder.record(&TraceEvent::Recovery {
            partition: self.id,
            head: self.report.head,
            tail: self.report.tail,
            transactions: self.report.transactions,
            dropped: self.report.dropped.len(),
            truncated_at: self.report.truncated_at,
        });
        self.manager.attach_trace(recorder);
    }

    /// Snapshot of the journal for diagnostics.
    #[must_use]
    pub fn dump(&self) -> JournalDump {
        JournalDump {
            partition: self.id,
            mode: self.mode(),
            generation: self.generation(),
            next_sequence: self.next_sequence(),
            head: self.head(),
            tail: self.tail(),
            segment_count: self.config.segment_count,
            segment_size: self.config.segment_size,
            segments: (0..self.config.segment_count)
                .filter_map(|id| self.journal.segment_state(id))
                .collect(),
            transactions: self.journal.entries(),
            object_count: self.object_count(),
            mirrors: MirrorStatus {
                total: self.store.mirrors().len(),
                live: self.store.mirrors().live(),
            },
        }
    }

    /// Lets allocation overwrite the tail instead of failing.
    ///
    /// Overwritten transactions and their objects are lost and the
    /// partition reports [`PartitionMode::Degraded`].
    #[cfg(any(test, feature = "testing"))]
    pub fn set_override_collision(&self, enabled: bool) {
        self.journal.set_override_collision(enabled);
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("head", &self.head())
            .field("tail", &self.tail())
            .field("generation", &self.generation())
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}
