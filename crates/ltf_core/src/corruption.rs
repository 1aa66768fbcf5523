//! Deterministic on-disk corruption for recovery tests.
//!
//! A [`CorruptionState`] holds the injected targets of one partition. Every
//! read of a targeted record is altered in the read buffer, after the
//! segment trailer has been verified, so the header codecs see the damage.
//! The durable bytes are never modified and [`CorruptionState::clear`]
//! restores normal reads.

use crate::format::{
    segment_offsets, superblock_offsets, txn_offsets, SegmentHeader, TransactionHeader,
    SEGMENT_HEADER_SIZE,
};
use crate::types::SegmentId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

/// Superblock fields that can be corrupted.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuperblockField {
    Magic,
    Version,
    GenerationId,
    SegmentCount,
    SegmentSize,
    RealHeadSegmentId,
    Checksum,
}

impl SuperblockField {
    /// Every field, in on-disk order.
    pub const ALL: [Self; 7] = [
        Self::Magic,
        Self::Version,
        Self::GenerationId,
        Self::SegmentCount,
        Self::SegmentSize,
        Self::RealHeadSegmentId,
        Self::Checksum,
    ];

    fn range(self) -> Range<usize> {
        match self {
            Self::Magic => superblock_offsets::MAGIC,
            Self::Version => superblock_offsets::VERSION,
            Self::GenerationId => superblock_offsets::GENERATION,
            Self::SegmentCount => superblock_offsets::SEGMENT_COUNT,
            Self::SegmentSize => superblock_offsets::SEGMENT_SIZE,
            Self::RealHeadSegmentId => superblock_offsets::REAL_HEAD,
            Self::Checksum => superblock_offsets::CHECKSUM,
        }
    }
}

/// Segment header fields that can be corrupted.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentField {
    Magic,
    Version,
    SegmentId,
    FirstTransactionOffset,
    TxnStartSegmentId,
    RealTailSegmentId,
    GenerationId,
    Checksum,
}

impl SegmentField {
    /// Every field, in on-disk order.
    pub const ALL: [Self; 8] = [
        Self::Magic,
        Self::Version,
        Self::SegmentId,
        Self::FirstTransactionOffset,
        Self::TxnStartSegmentId,
        Self::RealTailSegmentId,
        Self::GenerationId,
        Self::Checksum,
    ];

    fn range(self) -> Range<usize> {
        match self {
            Self::Magic => segment_offsets::MAGIC,
            Self::Version => segment_offsets::VERSION,
            Self::SegmentId => segment_offsets::SEGMENT_ID,
            Self::FirstTransactionOffset => segment_offsets::FIRST_TXN_OFFSET,
            Self::TxnStartSegmentId => segment_offsets::TXN_START,
            Self::RealTailSegmentId => segment_offsets::REAL_TAIL,
            Self::GenerationId => segment_offsets::GENERATION,
            Self::Checksum => segment_offsets::CHECKSUM,
        }
    }
}

/// Transaction header fields that can be corrupted.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionField {
    Magic,
    Id,
    SequenceId,
    GenerationId,
    RemovalCount,
    AddCount,
    TotalOndiskNvoHeaderSize,
    TotalOndiskSize,
    PaddingSize,
    HeaderChecksum,
    PartCount,
    /// All per-part checksums.
    PartChecksums,
}

impl TransactionField {
    /// Every field, in on-disk order.
    pub const ALL: [Self; 12] = [
        Self::Magic,
        Self::Id,
        Self::SequenceId,
        Self::GenerationId,
        Self::RemovalCount,
        Self::AddCount,
        Self::TotalOndiskNvoHeaderSize,
        Self::TotalOndiskSize,
        Self::PaddingSize,
        Self::HeaderChecksum,
        Self::PartCount,
        Self::PartChecksums,
    ];

    fn range(self, part_count: usize) -> Range<usize> {
        match self {
            Self::Magic => txn_offsets::MAGIC,
            Self::Id => txn_offsets::ID,
            Self::SequenceId => txn_offsets::SEQUENCE,
            Self::GenerationId => txn_offsets::GENERATION,
            Self::RemovalCount => txn_offsets::REMOVAL_COUNT,
            Self::AddCount => txn_offsets::ADD_COUNT,
            Self::TotalOndiskNvoHeaderSize => txn_offsets::NVO_HEADER_SIZE,
            Self::TotalOndiskSize => txn_offsets::TOTAL_ONDISK_SIZE,
            Self::PaddingSize => txn_offsets::PADDING_SIZE,
            Self::HeaderChecksum => txn_offsets::HEADER_CHECKSUM,
            Self::PartCount => txn_offsets::PART_COUNT,
            Self::PartChecksums => {
                txn_offsets::FIXED_SIZE..TransactionHeader::encoded_len_for(part_count)
            }
        }
    }
}

/// A record to corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorruptionTarget {
    /// A superblock field.
    Superblock(SuperblockField),
    /// A field of a segment header.
    Segment {
        /// Segment position.
        segment_id: SegmentId,
        /// Field to corrupt.
        field: SegmentField,
    },
    /// A field of the transaction header stored in a segment.
    Transaction {
        /// Segment holding the transaction header.
        segment_id: SegmentId,
        /// Field to corrupt.
        field: TransactionField,
    },
    /// The first body byte carried by a segment.
    PartBody {
        /// Segment position.
        segment_id: SegmentId,
    },
}

/// How targeted bytes are altered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorruptionMode {
    /// XOR every byte with `0xFF`.
    #[default]
    FlipBits,
    /// Overwrite with zeros.
    Zero,
}

impl CorruptionMode {
    fn apply(self, bytes: &mut [u8]) {
        for byte in bytes {
            *byte = match self {
                Self::FlipBits => *byte ^ 0xFF,
                Self::Zero => 0,
            };
        }
    }
}

/// Active corruption targets of one partition.
#[derive(Debug, Default)]
pub struct CorruptionState {
    injected: RwLock<Vec<(CorruptionTarget, CorruptionMode)>>,
}

impl CorruptionState {
    /// Creates a state with nothing injected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `target`. Injecting the same target again replaces its mode.
    pub fn inject(&self, target: CorruptionTarget, mode: CorruptionMode) {
        debug!(?target, ?mode, "corruption injected");
        let mut injected = self.injected.write();
        match injected.iter_mut().find(|(t, _)| *t == target) {
            Some(entry) => entry.1 = mode,
            None => injected.push((target, mode)),
        }
    }

    /// Removes every injected target.
    pub fn clear(&self) {
        self.injected.write().clear();
    }

    /// Returns true if nothing is injected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.injected.read().is_empty()
    }

    /// Currently injected targets.
    #[must_use]
    pub fn active(&self) -> Vec<(CorruptionTarget, CorruptionMode)> {
        self.injected.read().clone()
    }

    /// Alters a superblock read buffer.
    pub fn apply_superblock(&self, buf: &mut [u8]) {
        for (target, mode) in self.injected.read().iter() {
            if let CorruptionTarget::Superblock(field) = target {
                alter(buf, field.range(), *mode);
            }
        }
    }

    /// Alters a verified segment read buffer.
    pub fn apply_segment(&self, segment_id: SegmentId, buf: &mut [u8]) {
        let injected = self.injected.read();
        if injected.is_empty() {
            return;
        }
        // locate records before any byte is altered
        let body_start = first_body_offset(buf);
        let part_count = transaction_part_count(buf);

        for (target, mode) in injected.iter() {
            match *target {
                CorruptionTarget::Segment { segment_id: id, field } if id == segment_id => {
                    alter(buf, field.range(), *mode);
                }
                CorruptionTarget::Transaction { segment_id: id, field } if id == segment_id => {
                    let range = field.range(part_count);
                    alter(
                        buf,
                        SEGMENT_HEADER_SIZE + range.start..SEGMENT_HEADER_SIZE + range.end,
                        *mode,
                    );
                }
                CorruptionTarget::PartBody { segment_id: id } if id == segment_id => {
                    alter(buf, body_start..body_start + 1, *mode);
                }
                _ => {}
            }
        }
    }
}

fn alter(buf: &mut [u8], range: Range<usize>, mode: CorruptionMode) {
    let end = range.end.min(buf.len());
    let start = range.start.min(end);
    mode.apply(&mut buf[start..end]);
}

/// Offset of the first body byte in a segment buffer.
fn first_body_offset(buf: &[u8]) -> usize {
    match SegmentHeader::decode(buf) {
        Ok(header) if !header.is_continuation() => {
            SEGMENT_HEADER_SIZE + TransactionHeader::encoded_len_for(transaction_part_count(buf))
        }
        _ => SEGMENT_HEADER_SIZE,
    }
}

fn transaction_part_count(buf: &[u8]) -> usize {
    let at = SEGMENT_HEADER_SIZE + txn_offsets::PART_COUNT.start;
    buf.get(at..at + 4)
        .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .min(crate::format::segment_payload_capacity(buf.len() as u32) / 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatError, Superblock};
    use crate::types::GenerationId;

    fn superblock_bytes() -> Vec<u8> {
        Superblock::fresh(10, 4096).encode()
    }

    #[test]
    fn every_superblock_field_breaks_decode() {
        for field in SuperblockField::ALL {
            let state = CorruptionState::new();
            state.inject(CorruptionTarget::Superblock(field), CorruptionMode::FlipBits);
            let mut buf = superblock_bytes();
            state.apply_superblock(&mut buf);
            assert!(Superblock::decode(&buf).is_err(), "{field:?}");
        }
    }

    #[test]
    fn clear_restores_reads() {
        let state = CorruptionState::new();
        state.inject(
            CorruptionTarget::Superblock(SuperblockField::Checksum),
            CorruptionMode::Zero,
        );
        state.clear();
        let mut buf = superblock_bytes();
        state.apply_superblock(&mut buf);
        assert_eq!(buf, superblock_bytes());
        assert!(state.is_empty());
    }

    #[test]
    fn reinjecting_replaces_mode() {
        let state = CorruptionState::new();
        let target = CorruptionTarget::PartBody { segment_id: 1 };
        state.inject(target, CorruptionMode::FlipBits);
        state.inject(target, CorruptionMode::Zero);
        assert_eq!(state.active(), vec![(target, CorruptionMode::Zero)]);
    }

    #[test]
    fn segment_target_only_hits_its_segment() {
        let state = CorruptionState::new();
        state.inject(
            CorruptionTarget::Segment {
                segment_id: 3,
                field: SegmentField::Checksum,
            },
            CorruptionMode::FlipBits,
        );

        let header = SegmentHeader::starting(2, 0, GenerationId::new(1));
        let mut buf = vec![0u8; 1024];
        buf[..SegmentHeader::ENCODED_SIZE].copy_from_slice(&header.encode());
        state.apply_segment(2, &mut buf);
        assert!(SegmentHeader::decode(&buf).is_ok());
        state.apply_segment(3, &mut buf);
        assert!(matches!(
            SegmentHeader::decode(&buf),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn part_body_skips_transaction_header() {
        let state = CorruptionState::new();
        state.inject(CorruptionTarget::PartBody { segment_id: 0 }, CorruptionMode::FlipBits);

        let mut buf = vec![0u8; 1024];
        let header = SegmentHeader::starting(0, 0, GenerationId::new(1));
        buf[..SegmentHeader::ENCODED_SIZE].copy_from_slice(&header.encode());
        // two-part transaction header: 56 + 8 bytes
        let part_count_at = SEGMENT_HEADER_SIZE + txn_offsets::PART_COUNT.start;
        buf[part_count_at..part_count_at + 4].copy_from_slice(&2u32.to_le_bytes());

        state.apply_segment(0, &mut buf);
        assert_eq!(buf[SEGMENT_HEADER_SIZE + 64], 0xFF);
        assert_eq!(buf[SEGMENT_HEADER_SIZE + 63], 0);
    }
}
