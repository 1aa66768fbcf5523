//! Segment header codec.

use super::{
    checksum, ensure_len, le_u16, le_u32, le_u64, FormatError, FORMAT_VERSION, NO_TRANSACTION,
    SEGMENT_HEADER_SIZE,
};
use crate::types::{GenerationId, SegmentId};
use serde::{Deserialize, Serialize};

/// Magic identifying a segment header ("LTFG").
pub const SEGMENT_MAGIC: u32 = u32::from_le_bytes(*b"LTFG");

const RECORD: &str = "segment header";

pub(crate) mod offsets {
    use std::ops::Range;

    pub const MAGIC: Range<usize> = 0..4;
    pub const VERSION: Range<usize> = 4..6;
    pub const SEGMENT_ID: Range<usize> = 6..10;
    pub const FIRST_TXN_OFFSET: Range<usize> = 10..14;
    pub const TXN_START: Range<usize> = 14..18;
    pub const REAL_TAIL: Range<usize> = 18..22;
    pub const GENERATION: Range<usize> = 22..30;
    pub const CHECKSUM: Range<usize> = 30..34;
    pub const ENCODED_SIZE: usize = 34;
}

/// Header at the start of every written segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// Format version.
    pub version: u16,
    /// Position of this segment in the ring.
    pub segment_id: SegmentId,
    /// Offset of the transaction that starts in this segment, or
    /// [`NO_TRANSACTION`] for a continuation part.
    pub first_transaction_offset: u32,
    /// Segment holding the header of the transaction this segment belongs to.
    pub txn_start_segment_id: SegmentId,
    /// Oldest live segment when this segment was written.
    pub real_tail_segment_id: SegmentId,
    /// Journal generation this segment was written under.
    pub generation: GenerationId,
}

impl SegmentHeader {
    /// Encoded size in bytes (the on-disk slot is [`SEGMENT_HEADER_SIZE`]).
    pub const ENCODED_SIZE: usize = offsets::ENCODED_SIZE;

    /// Header of a segment that starts a transaction.
    #[must_use]
    pub fn starting(
        segment_id: SegmentId,
        real_tail_segment_id: SegmentId,
        generation: GenerationId,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            segment_id,
            first_transaction_offset: SEGMENT_HEADER_SIZE as u32,
            txn_start_segment_id: segment_id,
            real_tail_segment_id,
            generation,
        }
    }

    /// Header of a segment that continues the transaction started at
    /// `txn_start_segment_id`.
    #[must_use]
    pub fn continuation(
        segment_id: SegmentId,
        txn_start_segment_id: SegmentId,
        real_tail_segment_id: SegmentId,
        generation: GenerationId,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            segment_id,
            first_transaction_offset: NO_TRANSACTION,
            txn_start_segment_id,
            real_tail_segment_id,
            generation,
        }
    }

    /// Returns true if no transaction starts in this segment.
    #[must_use]
    pub const fn is_continuation(&self) -> bool {
        self.first_transaction_offset == NO_TRANSACTION
    }

    /// Serializes the header with its checksum.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.segment_id.to_le_bytes());
        buf.extend_from_slice(&self.first_transaction_offset.to_le_bytes());
        buf.extend_from_slice(&self.txn_start_segment_id.to_le_bytes());
        buf.extend_from_slice(&self.real_tail_segment_id.to_le_bytes());
        buf.extend_from_slice(&self.generation.as_u64().to_le_bytes());
        let crc = checksum(&[&buf]);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and validates a segment header.
    ///
    /// # Errors
    ///
    /// Fails on a short buffer, bad magic, checksum mismatch, unknown
    /// version, or a transaction offset outside the segment payload.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(RECORD, buf, Self::ENCODED_SIZE)?;

        let magic = le_u32(buf, offsets::MAGIC.start);
        if magic != SEGMENT_MAGIC {
            return Err(FormatError::BadMagic {
                record: RECORD,
                found: magic,
            });
        }

        let stored = le_u32(buf, offsets::CHECKSUM.start);
        let computed = checksum(&[&buf[..offsets::CHECKSUM.start]]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                record: RECORD,
                stored,
                computed,
            });
        }

        let version = le_u16(buf, offsets::VERSION.start);
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion {
                record: RECORD,
                found: version,
            });
        }

        let header = Self {
            version,
            segment_id: le_u32(buf, offsets::SEGMENT_ID.start),
            first_transaction_offset: le_u32(buf, offsets::FIRST_TXN_OFFSET.start),
            txn_start_segment_id: le_u32(buf, offsets::TXN_START.start),
            real_tail_segment_id: le_u32(buf, offsets::REAL_TAIL.start),
            generation: GenerationId::new(le_u64(buf, offsets::GENERATION.start)),
        };

        if !header.is_continuation() {
            if header.first_transaction_offset as usize != SEGMENT_HEADER_SIZE {
                return Err(FormatError::Inconsistent {
                    record: RECORD,
                    message: format!(
                        "transaction offset {} is not the payload start",
                        header.first_transaction_offset
                    ),
                });
            }
            if header.txn_start_segment_id != header.segment_id {
                return Err(FormatError::Inconsistent {
                    record: RECORD,
                    message: format!(
                        "segment {} starts a transaction but names {} as its start",
                        header.segment_id, header.txn_start_segment_id
                    ),
                });
            }
        }

        Ok(header)
    }
}
