//! Copy-forward compaction.
//!
//! When the journal is full the oldest transactions are retired one by one.
//! A transaction with no live objects is simply reclaimed. One that still
//! owns live objects has them re-added at the head by a `CopyForward`
//! transaction, keeping their ids, before its segments are reclaimed.

use crate::admin::TraceEvent;
use crate::error::{CoreError, CoreResult};
use crate::format::{PartLayout, TransactionBody};
use crate::transaction::TransactionManager;
use crate::types::Owner;
use tracing::{debug, info};

/// Frees at least `needed` segments or fails with
/// [`CoreError::JournalFull`].
pub(crate) fn handle_journal_full(manager: &TransactionManager, needed: u32) -> CoreResult<()> {
    let journal = manager.journal();
    let objects = manager.objects();
    let full = |free: u32| CoreError::JournalFull {
        requested: needed,
        free,
    };

    if needed > journal.usable_segment_count() {
        return Err(full(journal.free_segments()));
    }

    // each transaction present now is retired at most once
    let mut budget = journal.entries().len();
    while journal.free_segments() < needed {
        let free = journal.free_segments();
        if budget == 0 {
            return Err(full(free));
        }
        budget -= 1;
        let Some(oldest) = journal.oldest() else {
            return Err(full(free));
        };

        let live = objects.live_owned_by(oldest.txn_id, &oldest.added);
        if !live.is_empty() {
            let mut relocation = manager.begin(Owner::CopyForward);
            for object in &live {
                relocation.add_existing(object.id, object.object_type, object.payload.clone())?;
            }
            let body = TransactionBody {
                removals: Vec::new(),
                adds: relocation.adds().to_vec(),
            };
            let layout = PartLayout::plan(body.encoded_len(), manager.segment_size())?;
            if layout.part_count > free {
                debug!(
                    txn = oldest.txn_id.as_u64(),
                    parts = layout.part_count,
                    free,
                    "no room to copy forward"
                );
                return Err(full(free));
            }

            let status = manager.commit_inner(&mut relocation, None, false)?;
            info!(
                from = oldest.txn_id.as_u64(),
                to = status.txn_id.as_u64(),
                objects = live.len(),
                "live objects copied forward"
            );
            manager.emit(TraceEvent::CopyForward {
                partition: manager.partition(),
                from_txn: oldest.txn_id.as_u64(),
                to_txn: status.txn_id.as_u64(),
                objects: live.len(),
            });
        }

        if let Some(entry) = journal.reclaim_oldest() {
            manager.emit(TraceEvent::Reclaim {
                partition: manager.partition(),
                txn_id: entry.txn_id.as_u64(),
                segments: entry.range.count,
            });
        }
    }
    Ok(())
}
