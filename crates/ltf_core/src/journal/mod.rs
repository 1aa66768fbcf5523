//! Circular journal bookkeeping.
//!
//! The journal is a fixed ring of segments. `head` is the next segment to
//! write and `tail` the oldest live one; `head == tail` means empty, so at
//! most `segment_count - 1` segments are ever live. All head/tail state sits
//! behind one mutex.
//!
//! Committed transactions are kept in commit order so the tail can be
//! advanced one transaction at a time.

use crate::error::{CoreError, CoreResult};
use crate::types::{GenerationId, ObjectId, Owner, SegmentId, SequenceNumber, TransactionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
#[cfg(any(test, feature = "testing"))]
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
#[cfg(any(test, feature = "testing"))]
use tracing::warn;

/// Lifecycle of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    /// Never written, or rolled back.
    Empty,
    /// Reserved by an in-flight commit.
    Allocated,
    /// Holds part of a committed transaction.
    Durable,
    /// Behind the tail; free for reuse.
    Reclaimable,
}

/// Consecutive segments of the ring, possibly wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRange {
    /// First segment.
    pub start: SegmentId,
    /// Number of segments.
    pub count: u32,
    ring: u32,
}

impl SegmentRange {
    /// Creates a range of `count` segments from `start` in a ring of `ring`.
    #[must_use]
    pub fn new(start: SegmentId, count: u32, ring: u32) -> Self {
        Self { start, count, ring }
    }

    /// Segment at position `index` of the range.
    #[must_use]
    pub fn nth(&self, index: u32) -> SegmentId {
        (self.start + index) % self.ring
    }

    /// Segment just past the range.
    #[must_use]
    pub fn end(&self) -> SegmentId {
        self.nth(self.count)
    }

    /// Segment ids of the range in order.
    pub fn iter(&self) -> impl Iterator<Item = SegmentId> + '_ {
        (0..self.count).map(move |i| self.nth(i))
    }

    /// Returns true if `id` lies in the range.
    #[must_use]
    pub fn contains(&self, id: SegmentId) -> bool {
        self.iter().any(|s| s == id)
    }
}

/// A committed transaction held by the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Transaction id.
    pub txn_id: TransactionId,
    /// Commit sequence number.
    pub sequence: SequenceNumber,
    /// Generation the transaction was written under.
    pub generation: GenerationId,
    /// Segments holding the transaction.
    pub range: SegmentRange,
    /// Who committed it.
    pub owner: Owner,
    /// Objects the transaction added.
    pub added: Vec<ObjectId>,
}

#[derive(Debug)]
struct JournalState {
    head: SegmentId,
    tail: SegmentId,
    states: Vec<SegmentState>,
    entries: VecDeque<JournalEntry>,
    pending: Option<SegmentRange>,
    evicted: Vec<JournalEntry>,
}

impl JournalState {
    fn live(&self, count: u32) -> u32 {
        (self.head + count - self.tail) % count
    }

    fn pop_oldest(&mut self) -> Option<JournalEntry> {
        let entry = self.entries.pop_front()?;
        for id in entry.range.iter() {
            self.states[id as usize] = SegmentState::Reclaimable;
        }
        self.tail = entry.range.end();
        Some(entry)
    }
}

/// Head/tail state of one partition's journal.
#[derive(Debug)]
pub struct Journal {
    segment_count: u32,
    state: Mutex<JournalState>,
    #[cfg(any(test, feature = "testing"))]
    override_collision: AtomicBool,
}

impl Journal {
    /// Creates an empty journal with head and tail at `head`.
    #[must_use]
    pub fn new(segment_count: u32, head: SegmentId) -> Self {
        Self::restored(segment_count, head, head, Vec::new())
    }

    /// Rebuilds a journal from recovered entries.
    ///
    /// `entries` must be in commit order and lie between `tail` and `head`.
    #[must_use]
    pub fn restored(
        segment_count: u32,
        head: SegmentId,
        tail: SegmentId,
        entries: Vec<JournalEntry>,
    ) -> Self {
        let mut states = vec![SegmentState::Empty; segment_count as usize];
        for entry in &entries {
            for id in entry.range.iter() {
                states[id as usize] = SegmentState::Durable;
            }
        }
        Self {
            segment_count,
            state: Mutex::new(JournalState {
                head,
                tail,
                states,
                entries: entries.into(),
                pending: None,
                evicted: Vec::new(),
            }),
            #[cfg(any(test, feature = "testing"))]
            override_collision: AtomicBool::new(false),
        }
    }

    /// Number of segments in the ring.
    #[must_use]
    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    /// Most segments that can be live at once.
    #[must_use]
    pub fn usable_segment_count(&self) -> u32 {
        self.segment_count - 1
    }

    /// Next segment to be written.
    #[must_use]
    pub fn head(&self) -> SegmentId {
        self.state.lock().head
    }

    /// Oldest live segment.
    #[must_use]
    pub fn tail(&self) -> SegmentId {
        self.state.lock().tail
    }

    /// Segments between tail and head, in-flight allocations included.
    #[must_use]
    pub fn live_segments(&self) -> u32 {
        self.state.lock().live(self.segment_count)
    }

    /// Segments that can still be allocated.
    #[must_use]
    pub fn free_segments(&self) -> u32 {
        self.usable_segment_count() - self.live_segments()
    }

    /// State of segment `id`, or `None` outside the ring.
    #[must_use]
    pub fn segment_state(&self, id: SegmentId) -> Option<SegmentState> {
        self.state.lock().states.get(id as usize).copied()
    }

    /// Committed transactions, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }

    /// Oldest committed transaction.
    #[must_use]
    pub fn oldest(&self) -> Option<JournalEntry> {
        self.state.lock().entries.front().cloned()
    }

    /// Segments needed for `size_bytes` of on-disk data.
    #[must_use]
    pub fn segments_for(&self, size_bytes: u64, segment_size: u32) -> u32 {
        size_bytes.div_ceil(u64::from(segment_size)).max(1) as u32
    }

    /// Reserves enough whole segments at the head for `size_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalFull`] when the allocation would overtake
    /// the tail.
    pub fn allocate(&self, size_bytes: u64, segment_size: u32) -> CoreResult<SegmentRange> {
        self.allocate_segments(self.segments_for(size_bytes, segment_size))
    }

    /// Reserves `n` segments at the head.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalFull`] when `live + n > segment_count - 1`,
    /// and an invalid-operation error while another allocation is pending.
    pub fn allocate_segments(&self, n: u32) -> CoreResult<SegmentRange> {
        if n == 0 {
            return Err(CoreError::invalid_operation("allocation of zero segments"));
        }
        let mut state = self.state.lock();
        if state.pending.is_some() {
            return Err(CoreError::invalid_operation(
                "an allocation is already in flight",
            ));
        }

        let usable = self.usable_segment_count();
        if n > usable - state.live(self.segment_count) && n <= usable {
            self.make_room(&mut state, n);
        }
        let free = usable - state.live(self.segment_count);

        if n > free {
            return Err(CoreError::JournalFull { requested: n, free });
        }

        let range = SegmentRange::new(state.head, n, self.segment_count);
        for id in range.iter() {
            state.states[id as usize] = SegmentState::Allocated;
        }
        state.head = range.end();
        state.pending = Some(range);
        debug!(start = range.start, count = n, "segments allocated");
        Ok(range)
    }

    /// Overwrites the oldest transactions until `n` segments are free, if
    /// the collision override is on.
    #[cfg(any(test, feature = "testing"))]
    fn make_room(&self, state: &mut JournalState, n: u32) {
        if !self.override_collision.load(Ordering::Acquire) {
            return;
        }
        while self.usable_segment_count() - state.live(self.segment_count) < n {
            let Some(entry) = state.pop_oldest() else {
                break;
            };
            warn!(
                txn = entry.txn_id.as_u64(),
                segments = entry.range.count,
                "collision override: overwriting live transaction"
            );
            state.evicted.push(entry);
        }
    }

    #[cfg(not(any(test, feature = "testing")))]
    fn make_room(&self, _state: &mut JournalState, _n: u32) {}

    /// Publishes a committed transaction occupying the pending allocation.
    ///
    /// # Errors
    ///
    /// Fails if `entry.range` is not the pending allocation.
    pub fn mark_durable(&self, entry: JournalEntry) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.pending != Some(entry.range) {
            return Err(CoreError::invalid_operation(format!(
                "range {:?} is not the pending allocation",
                entry.range
            )));
        }
        for id in entry.range.iter() {
            state.states[id as usize] = SegmentState::Durable;
        }
        state.pending = None;
        state.entries.push_back(entry);
        Ok(())
    }

    /// Rolls back the pending allocation.
    ///
    /// # Errors
    ///
    /// Fails if `range` is not the most recent, still pending allocation.
    pub fn release(&self, range: SegmentRange) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.pending != Some(range) {
            return Err(CoreError::invalid_operation(format!(
                "range {range:?} is not the pending allocation"
            )));
        }
        for id in range.iter() {
            state.states[id as usize] = SegmentState::Empty;
        }
        state.head = range.start;
        state.pending = None;
        debug!(start = range.start, count = range.count, "allocation released");
        Ok(())
    }

    /// Reclaims the oldest committed transaction, advancing the tail past it.
    pub fn reclaim_oldest(&self) -> Option<JournalEntry> {
        let entry = self.state.lock().pop_oldest()?;
        debug!(
            txn = entry.txn_id.as_u64(),
            start = entry.range.start,
            count = entry.range.count,
            "transaction reclaimed"
        );
        Some(entry)
    }

    /// Reclaims the `n` oldest committed transactions.
    pub fn advance_tail(&self, n: usize) -> Vec<JournalEntry> {
        (0..n).map_while(|_| self.reclaim_oldest()).collect()
    }

    /// Enables overwriting the tail instead of failing with journal-full.
    ///
    /// Transactions overwritten this way are lost and recovery can no
    /// longer reproduce the committed history.
    #[cfg(any(test, feature = "testing"))]
    pub fn set_override_collision(&self, enabled: bool) {
        self.override_collision.store(enabled, Ordering::Release);
    }

    /// Transactions overwritten by the collision override since the last
    /// call.
    pub fn take_evicted(&self) -> Vec<JournalEntry> {
        std::mem::take(&mut self.state.lock().evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(range: SegmentRange, id: u64) -> JournalEntry {
        JournalEntry {
            txn_id: TransactionId::new(id),
            sequence: SequenceNumber::new(id),
            generation: GenerationId::new(id + 1),
            range,
            owner: Owner::WriteBuffer,
            added: Vec::new(),
        }
    }

    fn commit(journal: &Journal, n: u32, id: u64) -> SegmentRange {
        let range = journal.allocate_segments(n).unwrap();
        journal.mark_durable(entry(range, id)).unwrap();
        range
    }

    #[test]
    fn range_wraps() {
        let range = SegmentRange::new(6, 3, 8);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![6, 7, 0]);
        assert_eq!(range.end(), 1);
        assert!(range.contains(0));
        assert!(!range.contains(1));
    }

    #[test]
    fn full_boundary() {
        let journal = Journal::new(10, 0);
        commit(&journal, 7, 1);
        assert_eq!(journal.live_segments(), 7);

        // live == count - 2 succeeds
        commit(&journal, 1, 2);
        assert_eq!(journal.live_segments(), 8);
        commit(&journal, 1, 3);
        assert_eq!(journal.live_segments(), 9);

        // live == count - 1 fails
        let err = journal.allocate_segments(1).unwrap_err();
        assert!(matches!(err, CoreError::JournalFull { requested: 1, free: 0 }));
        assert_eq!(journal.head(), 9);
        assert_eq!(journal.tail(), 0);
    }

    #[test]
    fn oversized_allocation_fails() {
        let journal = Journal::new(4, 0);
        assert!(matches!(
            journal.allocate_segments(4),
            Err(CoreError::JournalFull { .. })
        ));
        assert!(journal.allocate_segments(0).is_err());
    }

    #[test]
    fn release_rolls_back_head() {
        let journal = Journal::new(8, 2);
        let range = journal.allocate_segments(3).unwrap();
        assert_eq!(journal.head(), 5);
        assert_eq!(journal.segment_state(3), Some(SegmentState::Allocated));

        journal.release(range).unwrap();
        assert_eq!(journal.head(), 2);
        assert_eq!(journal.segment_state(3), Some(SegmentState::Empty));
        assert_eq!(journal.live_segments(), 0);
    }

    #[test]
    fn only_pending_allocation_can_be_released() {
        let journal = Journal::new(8, 0);
        let committed = commit(&journal, 2, 1);
        assert!(journal.release(committed).is_err());

        let pending = journal.allocate_segments(1).unwrap();
        assert!(journal.allocate_segments(1).is_err());
        journal.release(pending).unwrap();
    }

    #[test]
    fn reclaim_advances_tail_by_transaction() {
        let journal = Journal::new(8, 0);
        commit(&journal, 2, 1);
        commit(&journal, 3, 2);

        let reclaimed = journal.reclaim_oldest().unwrap();
        assert_eq!(reclaimed.txn_id, TransactionId::new(1));
        assert_eq!(journal.tail(), 2);
        assert_eq!(journal.segment_state(0), Some(SegmentState::Reclaimable));
        assert_eq!(journal.live_segments(), 3);

        let rest = journal.advance_tail(5);
        assert_eq!(rest.len(), 1);
        assert_eq!(journal.tail(), journal.head());
        assert!(journal.oldest().is_none());
    }

    #[test]
    fn reclaimed_segments_are_reused_across_wrap() {
        let journal = Journal::new(4, 0);
        commit(&journal, 3, 1);
        journal.reclaim_oldest();
        let range = commit(&journal, 2, 2);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![3, 0]);
        assert_eq!(journal.segment_state(0), Some(SegmentState::Durable));
    }

    #[test]
    fn collision_override_evicts_oldest() {
        let journal = Journal::new(4, 0);
        commit(&journal, 2, 1);
        commit(&journal, 1, 2);
        assert!(journal.allocate_segments(2).is_err());

        journal.set_override_collision(true);
        let range = journal.allocate_segments(2).unwrap();
        assert_eq!(range.start, 3);
        let evicted = journal.take_evicted();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].txn_id, TransactionId::new(1));
        assert!(journal.take_evicted().is_empty());
    }

    #[test]
    fn restored_journal_marks_entries_durable() {
        let e = entry(SegmentRange::new(1, 2, 6), 4);
        let journal = Journal::restored(6, 3, 1, vec![e.clone()]);
        assert_eq!(journal.entries(), vec![e]);
        assert_eq!(journal.segment_state(2), Some(SegmentState::Durable));
        assert_eq!(journal.segment_state(3), Some(SegmentState::Empty));
        assert_eq!(journal.free_segments(), 3);
    }
}
