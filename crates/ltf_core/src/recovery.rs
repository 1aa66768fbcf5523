//! Crash recovery.
//!
//! Recovery rebuilds a partition's in-memory state from its mirrors:
//!
//! 1. Read the superblock. Without a valid copy nothing can be trusted and
//!    recovery fails.
//! 2. Find the tail. Walking backward from the head, the newest valid
//!    segment records the tail that was current when it was written.
//! 3. Scan forward from the tail to the head. The first segment that fails
//!    a check is the boundary: it and everything after it are discarded. A
//!    transaction whose header is valid but whose continuation parts are
//!    unreadable or fail their checksums is dropped on its own.
//!
//!    Segments reclaimed by copy-forward are reused before any new tail is
//!    written, so a commit that failed after compaction can leave its parts
//!    at the start of the recorded range. Those segments carry a generation
//!    newer than the superblock, and the continuations that follow them
//!    belong to reclaimed transactions. They are stepped over and the tail
//!    moves past them.
//! 4. Replay the surviving transactions in order, removals then adds.

use crate::config::JournalConfig;
use crate::error::{CoreError, CoreResult};
use crate::format::{
    checksum, segment_payload_capacity, PartLayout, SegmentHeader, Superblock, TransactionBody,
    TransactionHeader, SEGMENT_HEADER_SIZE,
};
use crate::journal::{JournalEntry, SegmentRange};
use crate::object::ObjectIndex;
use crate::segment::SegmentStore;
use crate::types::{GenerationId, ObjectId, Owner, SegmentId, SequenceNumber, TransactionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A transaction replayed by recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredTransaction {
    /// Transaction id.
    pub txn_id: TransactionId,
    /// Sequence number.
    pub sequence: SequenceNumber,
    /// Generation it was written under.
    pub generation: GenerationId,
    /// Segments holding it.
    pub range: SegmentRange,
    /// Objects it removed.
    pub removed: Vec<ObjectId>,
    /// Objects it added.
    pub added: Vec<ObjectId>,
}

/// A transaction skipped because one of its parts is damaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedTransaction {
    /// Transaction id.
    pub txn_id: TransactionId,
    /// Sequence number.
    pub sequence: SequenceNumber,
    /// Segments holding it.
    pub range: SegmentRange,
    /// What failed.
    pub reason: String,
}

/// In-memory state rebuilt from disk.
#[derive(Debug)]
pub struct RecoveredState {
    /// Superblock recovery started from.
    pub superblock: Superblock,
    /// Next segment to write: the superblock head, or the truncation point.
    pub head: SegmentId,
    /// Oldest live segment.
    pub tail: SegmentId,
    /// Current generation.
    pub generation: GenerationId,
    /// Sequence number for the next commit.
    pub next_sequence: SequenceNumber,
    /// First transaction id to hand out.
    pub next_txid: TransactionId,
    /// Journal entries between tail and head, dropped transactions included.
    pub entries: Vec<JournalEntry>,
    /// Objects of the replayed transactions.
    pub objects: ObjectIndex,
    /// Replayed transactions, in commit order.
    pub transactions: Vec<RecoveredTransaction>,
    /// Segment where the scan stopped early, if it did.
    pub truncated_at: Option<SegmentId>,
    /// Transactions skipped because a part was damaged.
    pub dropped: Vec<DroppedTransaction>,
}

struct TailHint {
    tail: SegmentId,
    last_sequence: Option<SequenceNumber>,
    last_txid: Option<TransactionId>,
}

enum Scanned {
    Replay(TransactionHeader, TransactionBody),
    Dropped(TransactionHeader, String),
}

/// Rebuilds a partition's state from `store`.
///
/// # Errors
///
/// Returns [`CoreError::Recovery`] if no mirror holds a valid superblock or
/// the superblock's geometry differs from `config`.
pub fn recover(store: &SegmentStore, config: &JournalConfig) -> CoreResult<RecoveredState> {
    let superblock = store
        .read_superblock()
        .map_err(|e| CoreError::recovery(format!("no valid superblock: {e}")))?;

    if superblock.segment_count != config.segment_count
        || superblock.segment_size != config.segment_size
        || superblock.segment_count != store.segment_count()
        || superblock.segment_size != store.segment_size()
    {
        return Err(CoreError::recovery(format!(
            "superblock geometry {}x{} does not match configuration {}x{}",
            superblock.segment_count,
            superblock.segment_size,
            config.segment_count,
            config.segment_size
        )));
    }

    let count = superblock.segment_count;
    let sb_head = superblock.real_head_segment_id;
    let hint = find_tail(store, &superblock);
    debug!(head = sb_head, tail = ?hint.as_ref().map(|h| h.tail), "tail located");

    let mut state = RecoveredState {
        superblock,
        head: sb_head,
        tail: sb_head,
        generation: superblock.generation,
        next_sequence: SequenceNumber::new(1),
        next_txid: TransactionId::new(1),
        entries: Vec::new(),
        objects: ObjectIndex::new(),
        transactions: Vec::new(),
        truncated_at: None,
        dropped: Vec::new(),
    };

    let mut last_sequence = hint.as_ref().and_then(|h| h.last_sequence);
    let mut max_txid = hint.as_ref().and_then(|h| h.last_txid);

    if let (Some(hint), true) = (hint.as_ref(), config.enable_recovery) {
        state.tail = hint.tail;
        let mut replay = Vec::new();
        let mut last_generation: Option<GenerationId> = None;
        let mut scan_sequence: Option<SequenceNumber> = None;
        let mut pos = hint.tail;

        let mut leading = true;
        let mut stale = 0u32;

        while pos != sb_head {
            let remaining = (sb_head + count - pos) % count;
            let scanned = match scan_transaction(store, &superblock, pos, remaining) {
                Ok(scanned) => scanned,
                Err(reason) if leading && is_stale(store, &superblock, pos, stale > 0) => {
                    debug!(segment = pos, %reason, "stepping over uncommitted segment");
                    stale += 1;
                    pos = (pos + 1) % count;
                    state.tail = pos;
                    continue;
                }
                Err(reason) => {
                    warn!(segment = pos, %reason, "journal truncated");
                    state.truncated_at = Some(pos);
                    break;
                }
            };
            leading = false;

            let header = match &scanned {
                Scanned::Replay(header, _) | Scanned::Dropped(header, _) => header.clone(),
            };
            if last_generation.is_some_and(|g| header.generation <= g)
                || scan_sequence.is_some_and(|s| header.sequence <= s)
            {
                warn!(segment = pos, "journal truncated at out-of-order transaction");
                state.truncated_at = Some(pos);
                break;
            }
            last_generation = Some(header.generation);
            scan_sequence = Some(header.sequence);
            last_sequence = last_sequence.max(Some(header.sequence));
            max_txid = max_txid.max(Some(header.id));

            let range = SegmentRange::new(pos, header.part_count(), count);
            match scanned {
                Scanned::Replay(header, body) => {
                    let added: Vec<ObjectId> = body.adds.iter().map(|a| a.id).collect();
                    state.transactions.push(RecoveredTransaction {
                        txn_id: header.id,
                        sequence: header.sequence,
                        generation: header.generation,
                        range,
                        removed: body.removals.clone(),
                        added: added.clone(),
                    });
                    state.entries.push(entry(&header, range, added));
                    replay.push((header.id, body));
                }
                Scanned::Dropped(header, reason) => {
                    warn!(txn = header.id.as_u64(), segment = pos, %reason, "transaction dropped");
                    state.dropped.push(DroppedTransaction {
                        txn_id: header.id,
                        sequence: header.sequence,
                        range,
                        reason,
                    });
                    state.entries.push(entry(&header, range, Vec::new()));
                }
            }
            pos = range.end();
        }

        if let Some(boundary) = state.truncated_at {
            state.head = boundary;
        }
        if stale > 0 {
            info!(segments = stale, tail = state.tail, "uncommitted segments reclaimed");
        }

        for (txn_id, body) in replay {
            state.objects.apply(txn_id, &body.removals, body.adds);
        }
    }

    state.next_sequence = last_sequence.map_or(SequenceNumber::new(1), SequenceNumber::next);
    state.next_txid = TransactionId::new(max_txid.map_or(1, |id| id.as_u64() + 1));

    info!(
        head = state.head,
        tail = state.tail,
        generation = state.generation.as_u64(),
        transactions = state.transactions.len(),
        dropped = state.dropped.len(),
        truncated_at = ?state.truncated_at,
        objects = state.objects.len(),
        "journal recovered"
    );
    Ok(state)
}

fn entry(header: &TransactionHeader, range: SegmentRange, added: Vec<ObjectId>) -> JournalEntry {
    JournalEntry {
        txn_id: header.id,
        sequence: header.sequence,
        generation: header.generation,
        range,
        owner: Owner::WriteBuffer,
        added,
    }
}

/// Walks backward from the head to the newest valid segment.
fn find_tail(store: &SegmentStore, superblock: &Superblock) -> Option<TailHint> {
    let count = superblock.segment_count;
    let head = superblock.real_head_segment_id;

    for step in 1..count {
        let pos = (head + count - step) % count;
        let Some(header) = valid_segment_header(store, superblock, pos) else {
            continue;
        };
        let tail = header.real_tail_segment_id;
        let live = (head + count - tail) % count;
        // the segment must lie between its recorded tail and the head
        if tail >= count || (pos + count - tail) % count >= live {
            continue;
        }

        let start = store
            .read_committed_segment(header.txn_start_segment_id, superblock.generation)
            .ok()
            .and_then(|segment| TransactionHeader::decode(&segment[SEGMENT_HEADER_SIZE..]).ok());
        return Some(TailHint {
            tail,
            last_sequence: start.as_ref().map(|h| h.sequence),
            last_txid: start.as_ref().map(|h| h.id),
        });
    }
    None
}

fn valid_segment_header(
    store: &SegmentStore,
    superblock: &Superblock,
    pos: SegmentId,
) -> Option<SegmentHeader> {
    let segment = store.read_committed_segment(pos, superblock.generation).ok()?;
    let header = SegmentHeader::decode(&segment).ok()?;
    (header.segment_id == pos && header.generation <= superblock.generation).then_some(header)
}

/// Reads the transaction starting at `pos`.
///
/// `Err` marks `pos` as the scan boundary.
fn scan_transaction(
    store: &SegmentStore,
    superblock: &Superblock,
    pos: SegmentId,
    remaining: u32,
) -> Result<Scanned, String> {
    let count = superblock.segment_count;
    let capacity = segment_payload_capacity(superblock.segment_size);

    let first = store
        .read_committed_segment(pos, superblock.generation)
        .map_err(|e| e.to_string())?;
    let segment_header = SegmentHeader::decode(&first).map_err(|e| e.to_string())?;
    check_segment_header(&segment_header, superblock, pos)?;
    if segment_header.is_continuation() {
        return Err(format!("segment {pos} continues a transaction with no start"));
    }

    let payload = &first[SEGMENT_HEADER_SIZE..SEGMENT_HEADER_SIZE + capacity];
    let header = TransactionHeader::decode(payload).map_err(|e| e.to_string())?;
    let layout = PartLayout::from_header(&header, superblock.segment_size).map_err(|e| e.to_string())?;
    if header.generation != segment_header.generation {
        return Err(format!(
            "transaction generation {} differs from segment generation {}",
            header.generation, segment_header.generation
        ));
    }
    if header.part_count() > remaining {
        return Err(format!(
            "transaction of {} parts runs past the head",
            header.part_count()
        ));
    }

    let mut stream = Vec::with_capacity(layout.part_count as usize * capacity);
    stream.extend_from_slice(payload);
    let mut unreadable = None;

    for index in 1..header.part_count() {
        let part_pos = (pos + index) % count;
        let segment = match store.read_committed_segment(part_pos, superblock.generation) {
            Ok(segment) => segment,
            Err(e) => {
                unreadable.get_or_insert_with(|| format!("part {index} (segment {part_pos}): {e}"));
                stream.resize(stream.len() + capacity, 0);
                continue;
            }
        };
        let part_header = SegmentHeader::decode(&segment).map_err(|e| e.to_string())?;
        check_segment_header(&part_header, superblock, part_pos)?;
        if !part_header.is_continuation()
            || part_header.txn_start_segment_id != pos
            || part_header.generation != segment_header.generation
        {
            return Err(format!("segment {part_pos} is not part {index} of transaction at {pos}"));
        }
        stream.extend_from_slice(&segment[SEGMENT_HEADER_SIZE..SEGMENT_HEADER_SIZE + capacity]);
    }

    if let Some(reason) = unreadable {
        return Ok(Scanned::Dropped(header, reason));
    }

    let body_bytes = &stream[layout.header_len..layout.header_len + layout.body_len];
    for (index, expected) in header.part_checksums.iter().enumerate() {
        let actual = checksum(&[&body_bytes[layout.body_span(index as u32)]]);
        if actual != *expected {
            let reason = format!("part {index} checksum mismatch");
            return Ok(Scanned::Dropped(header, reason));
        }
    }

    match TransactionBody::decode(body_bytes, header.removal_count, header.add_count) {
        Ok(body) if body.object_header_size() == header.total_ondisk_nvo_header_size as usize => {
            Ok(Scanned::Replay(header, body))
        }
        Ok(_) => Ok(Scanned::Dropped(header, "record header size mismatch".to_string())),
        Err(e) => Ok(Scanned::Dropped(header, e.to_string())),
    }
}

/// Returns true if `pos` holds a part of a commit that never reached its
/// superblock, or, once such a part has been seen, a continuation of a
/// transaction whose start it overwrote.
fn is_stale(
    store: &SegmentStore,
    superblock: &Superblock,
    pos: SegmentId,
    after_stale: bool,
) -> bool {
    let Ok(segment) = store.read_segment(pos) else {
        return false;
    };
    let Ok(header) = SegmentHeader::decode(&segment) else {
        return false;
    };
    header.segment_id == pos
        && (header.generation > superblock.generation
            || (after_stale && header.is_continuation()))
}

fn check_segment_header(
    header: &SegmentHeader,
    superblock: &Superblock,
    pos: SegmentId,
) -> Result<(), String> {
    if header.segment_id != pos {
        return Err(format!("segment {pos} claims id {}", header.segment_id));
    }
    if header.generation > superblock.generation {
        return Err(format!(
            "segment {pos} generation {} is newer than superblock {}",
            header.generation, superblock.generation
        ));
    }
    Ok(())
}
