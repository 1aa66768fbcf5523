//! Transaction manager.

use crate::admin::{TraceControl, TraceEvent};
use crate::cancel::CancellationToken;
use crate::compaction;
use crate::config::JournalConfig;
use crate::error::{CoreError, CoreResult};
use crate::format::{
    checksum, PartLayout, SegmentHeader, Superblock, TransactionBody, TransactionHeader,
    FORMAT_VERSION, SEGMENT_HEADER_SIZE,
};
use crate::journal::{Journal, JournalEntry, SegmentRange};
use crate::mirror::Ack;
use crate::object::ObjectIndex;
use crate::segment::SegmentStore;
use crate::transaction::queue::CommitQueue;
use crate::transaction::state::Transaction;
use crate::types::{GenerationId, Owner, PartitionId, SequenceNumber, TransactionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How durable a committed transaction is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    /// Every configured mirror holds the transaction.
    Durable,
    /// Committed, but at least one mirror has failed and does not hold it.
    Degraded,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    /// Committed transaction.
    pub txn_id: TransactionId,
    /// Assigned sequence number.
    pub sequence: SequenceNumber,
    /// Generation written with the transaction.
    pub generation: GenerationId,
    /// Segments holding the transaction.
    pub range: SegmentRange,
    /// Bytes written to each mirror, whole segments included.
    pub ondisk_bytes: u64,
    /// Replication outcome.
    pub outcome: CommitOutcome,
    /// A cancel arrived after segment allocation and was not honored.
    pub cancel_deferred: bool,
}

/// Counters a manager resumes from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Counters {
    pub next_txid: u64,
    pub next_sequence: u64,
    pub generation: u64,
}

/// Commits transactions of one partition.
///
/// Commits are admitted one at a time in FIFO order. Each commit:
/// 1. validates the transaction
/// 2. honors a pending cancel
/// 3. allocates segments, running copy-forward when the journal is full
/// 4. writes every part to the mirrors
/// 5. writes the superblock with the new head and generation (commit point)
/// 6. publishes the transaction to the journal and object index
///
/// A failure before the commit point releases the allocation and leaves no
/// visible trace.
pub struct TransactionManager {
    partition: PartitionId,
    config: JournalConfig,
    store: Arc<SegmentStore>,
    journal: Arc<Journal>,
    objects: Arc<ObjectIndex>,
    next_txid: AtomicU64,
    next_seq: AtomicU64,
    generation: AtomicU64,
    queue: CommitQueue,
    trace: RwLock<Option<Arc<dyn TraceControl>>>,
    lost_history: AtomicBool,
}

impl TransactionManager {
    pub(crate) fn new(
        partition: PartitionId,
        config: JournalConfig,
        store: Arc<SegmentStore>,
        journal: Arc<Journal>,
        objects: Arc<ObjectIndex>,
        counters: Counters,
    ) -> Self {
        Self {
            partition,
            config,
            store,
            journal,
            objects,
            next_txid: AtomicU64::new(counters.next_txid),
            next_seq: AtomicU64::new(counters.next_sequence),
            generation: AtomicU64::new(counters.generation),
            queue: CommitQueue::new(),
            trace: RwLock::new(None),
            lost_history: AtomicBool::new(false),
        }
    }

    /// Begins a new transaction.
    pub fn begin(&self, owner: Owner) -> Transaction {
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        Transaction::new(id, owner)
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> GenerationId {
        GenerationId::new(self.generation.load(Ordering::SeqCst))
    }

    /// Sequence number the next commit receives.
    #[must_use]
    pub fn next_sequence(&self) -> SequenceNumber {
        SequenceNumber::new(self.next_seq.load(Ordering::SeqCst))
    }

    /// Returns true once the collision override has overwritten live data.
    #[must_use]
    pub fn lost_history(&self) -> bool {
        self.lost_history.load(Ordering::Acquire)
    }

    /// Sends future journal events to `recorder`.
    pub fn attach_trace(&self, recorder: Arc<dyn TraceControl>) {
        *self.trace.write() = Some(recorder);
    }

    pub(crate) fn emit(&self, event: TraceEvent) {
        if let Some(recorder) = self.trace.read().as_ref() {
            recorder.record(&event);
        }
    }

    pub(crate) fn partition(&self) -> PartitionId {
        self.partition
    }

    pub(crate) fn journal(&self) -> &Journal {
        &self.journal
    }

    pub(crate) fn objects(&self) -> &ObjectIndex {
        &self.objects
    }

    pub(crate) fn segment_size(&self) -> u32 {
        self.store.segment_size()
    }

    /// Commits `txn`, blocking until it is durable or has definitively
    /// failed.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperation`] for a finished or empty transaction
    ///   or a removal of an unknown object
    /// - [`CoreError::Cancelled`] if `cancel` fired before allocation
    /// - [`CoreError::JournalFull`] if no space could be made
    /// - [`CoreError::Commit`] if a write failed after allocation
    pub fn commit(
        &self,
        txn: &mut Transaction,
        cancel: &CancellationToken,
    ) -> CoreResult<CommitStatus> {
        let _turn = self.queue.enter();
        self.commit_inner(txn, Some(cancel), self.config.copy_forward)
    }

    /// Commit body; the caller holds the commit turn.
    pub(crate) fn commit_inner(
        &self,
        txn: &mut Transaction,
        cancel: Option<&CancellationToken>,
        allow_copy_forward: bool,
    ) -> CoreResult<CommitStatus> {
        self.validate(txn)?;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            debug!(txn = txn.id().as_u64(), "commit cancelled before allocation");
            return Err(CoreError::Cancelled);
        }

        let body = txn.body();
        let layout = PartLayout::plan(body.encoded_len(), self.store.segment_size())
            .map_err(|e| CoreError::invalid_operation(format!("transaction does not fit: {e}")))?;

        let range = self.allocate(layout.part_count, allow_copy_forward)?;
        self.drop_evicted();

        let sequence = self.next_sequence();
        let generation = self.generation().next();

        let degraded = match self.write_durable(txn, &body, &layout, range, sequence, generation) {
            Ok(degraded) => degraded,
            Err(e) => {
                if let Err(release) = self.journal.release(range) {
                    warn!(error = %release, "failed to release allocation");
                }
                warn!(txn = txn.id().as_u64(), error = %e, "commit failed, allocation released");
                return Err(CoreError::commit(e.to_string()));
            }
        };

        // the superblock is durable: publish
        let added = body.adds.iter().map(|a| a.id).collect();
        self.journal.mark_durable(JournalEntry {
            txn_id: txn.id(),
            sequence,
            generation,
            range,
            owner: txn.owner(),
            added,
        })?;
        self.objects.apply(txn.id(), &body.removals, body.adds);
        self.next_seq.store(sequence.next().as_u64(), Ordering::SeqCst);
        self.generation.store(generation.as_u64(), Ordering::SeqCst);
        txn.mark_committed();

        let outcome = if degraded || self.store.mirrors().is_degraded() {
            CommitOutcome::Degraded
        } else {
            CommitOutcome::Durable
        };
        let ondisk_bytes = u64::from(layout.total_ondisk_size());

        info!(
            partition = %self.partition,
            txn = txn.id().as_u64(),
            seq = sequence.as_u64(),
            generation = generation.as_u64(),
            start = range.start,
            parts = range.count,
            ?outcome,
            "transaction committed"
        );
        self.emit(TraceEvent::Commit {
            partition: self.partition,
            txn_id: txn.id().as_u64(),
            sequence: sequence.as_u64(),
            generation: generation.as_u64(),
            start_segment: range.start,
            parts: range.count,
            ondisk_bytes,
            degraded: outcome == CommitOutcome::Degraded,
        });

        Ok(CommitStatus {
            txn_id: txn.id(),
            sequence,
            generation,
            range,
            ondisk_bytes,
            outcome,
            cancel_deferred: cancel.is_some_and(CancellationToken::is_cancelled),
        })
    }

    fn validate(&self, txn: &Transaction) -> CoreResult<()> {
        if !txn.is_active() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is {:?}",
                txn.id(),
                txn.state()
            )));
        }
        if txn.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is empty",
                txn.id()
            )));
        }
        if let Some(unknown) = txn.removals().iter().find(|id| !self.objects.contains(**id)) {
            return Err(CoreError::invalid_operation(format!(
                "removal of unknown object {unknown}"
            )));
        }
        Ok(())
    }

    fn allocate(&self, parts: u32, allow_copy_forward: bool) -> CoreResult<SegmentRange> {
        match self.journal.allocate_segments(parts) {
            Err(CoreError::JournalFull { .. }) if allow_copy_forward => {
                compaction::handle_journal_full(self, parts)?;
                self.journal.allocate_segments(parts)
            }
            other => other,
        }
    }

    /// Drops objects of transactions the collision override overwrote.
    fn drop_evicted(&self) {
        for entry in self.journal.take_evicted() {
            let dropped = self.objects.drop_owned_by(entry.txn_id, &entry.added);
            self.lost_history.store(true, Ordering::Release);
            warn!(
                txn = entry.txn_id.as_u64(),
                objects = dropped,
                "objects lost to collision override"
            );
        }
    }

    /// Writes every part then the superblock. Returns whether replication
    /// was partial.
    fn write_durable(
        &self,
        txn: &Transaction,
        body: &TransactionBody,
        layout: &PartLayout,
        range: SegmentRange,
        sequence: SequenceNumber,
        generation: GenerationId,
    ) -> CoreResult<bool> {
        let body_bytes = body.encode();
        let part_checksums = (0..layout.part_count)
            .map(|i| checksum(&[&body_bytes[layout.body_span(i)]]))
            .collect();
        let header = TransactionHeader {
            id: txn.id(),
            sequence,
            generation,
            removal_count: body.removals.len() as u32,
            add_count: body.adds.len() as u32,
            total_ondisk_nvo_header_size: body.object_header_size() as u32,
            total_ondisk_size: layout.total_ondisk_size(),
            padding_size: layout.padding as u32,
            part_checksums,
        };

        let mut stream = header.encode();
        stream.extend_from_slice(&body_bytes);
        stream.resize(stream.len() + layout.padding, 0);

        let tail = self.journal.tail();
        let segment_size = self.store.segment_size() as usize;
        let mut degraded = false;

        for (index, segment_id) in range.iter().enumerate() {
            let segment_header = if index == 0 {
                SegmentHeader::starting(segment_id, tail, generation)
            } else {
                SegmentHeader::continuation(segment_id, range.start, tail, generation)
            };
            let mut segment = vec![0u8; segment_size];
            segment[..SegmentHeader::ENCODED_SIZE].copy_from_slice(&segment_header.encode());
            let part = &stream[layout.stream_range(index as u32)];
            segment[SEGMENT_HEADER_SIZE..SEGMENT_HEADER_SIZE + part.len()].copy_from_slice(part);

            let result = self.store.write_segment(segment_id, segment);
            degraded |= self.replicated(
                &format!("segment {segment_id}"),
                result,
                !self.config.require_full_replication,
            )?;
        }

        let superblock = Superblock {
            version: FORMAT_VERSION,
            generation,
            segment_count: self.store.segment_count(),
            segment_size: self.store.segment_size(),
            real_head_segment_id: range.end(),
        };
        // a superblock on any mirror is the commit point
        degraded |= self.replicated("superblock", self.store.write_superblock(&superblock), true)?;
        Ok(degraded)
    }

    fn replicated(&self, what: &str, result: CoreResult<Ack>, allow_partial: bool) -> CoreResult<bool> {
        match result {
            Ok(_) => Ok(false),
            Err(CoreError::PartialReplication(e)) => {
                for &mirror in &e.failed {
                    self.emit(TraceEvent::MirrorFailed {
                        partition: self.partition,
                        mirror,
                    });
                }
                if allow_partial && e.acked > 0 {
                    warn!(what, acked = e.acked, failed = ?e.failed, "write replicated partially");
                    Ok(true)
                } else {
                    Err(CoreError::PartialReplication(e))
                }
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("partition", &self.partition)
            .field("next_txid", &self.next_txid)
            .field("next_seq", &self.next_seq)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
