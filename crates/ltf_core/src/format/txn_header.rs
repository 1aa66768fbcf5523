//! Transaction header codec.

use super::{checksum, ensure_len, le_u32, le_u64, FormatError};
use crate::types::{GenerationId, SequenceNumber, TransactionId};
use serde::{Deserialize, Serialize};

/// Magic identifying a transaction header ("LTFT").
pub const TRANSACTION_MAGIC: u32 = u32::from_le_bytes(*b"LTFT");

/// Upper bound on parts per transaction, checked before allocating.
pub const MAX_PARTS: u32 = 1 << 16;

const RECORD: &str = "transaction header";

pub(crate) mod offsets {
    use std::ops::Range;

    pub const MAGIC: Range<usize> = 0..4;
    pub const ID: Range<usize> = 4..12;
    pub const SEQUENCE: Range<usize> = 12..20;
    pub const GENERATION: Range<usize> = 20..28;
    pub const REMOVAL_COUNT: Range<usize> = 28..32;
    pub const ADD_COUNT: Range<usize> = 32..36;
    pub const NVO_HEADER_SIZE: Range<usize> = 36..40;
    pub const TOTAL_ONDISK_SIZE: Range<usize> = 40..44;
    pub const PADDING_SIZE: Range<usize> = 44..48;
    pub const HEADER_CHECKSUM: Range<usize> = 48..52;
    pub const PART_COUNT: Range<usize> = 52..56;
    pub const FIXED_SIZE: usize = 56;
}

/// Header at the start of a transaction's first segment payload.
///
/// The header checksum covers every other byte of the header, including the
/// per-part checksums. Each part checksum covers the body bytes carried by
/// that part, so a damaged continuation segment is detected without trusting
/// anything it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    /// Transaction id.
    pub id: TransactionId,
    /// Commit sequence number.
    pub sequence: SequenceNumber,
    /// Journal generation at commit.
    pub generation: GenerationId,
    /// Number of removal records in the body.
    pub removal_count: u32,
    /// Number of add records in the body.
    pub add_count: u32,
    /// Bytes of record headers (everything in the body except payloads).
    pub total_ondisk_nvo_header_size: u32,
    /// Bytes the transaction occupies on disk, whole segments included.
    pub total_ondisk_size: u32,
    /// Zero bytes after the body in the last part.
    pub padding_size: u32,
    /// One checksum per part.
    pub part_checksums: Vec<u32>,
}

impl TransactionHeader {
    /// Size of the fields before the part checksums.
    pub const FIXED_SIZE: usize = offsets::FIXED_SIZE;

    /// Encoded length of a header with `parts` part checksums.
    #[must_use]
    pub const fn encoded_len_for(parts: usize) -> usize {
        Self::FIXED_SIZE + 4 * parts
    }

    /// Encoded length of this header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::encoded_len_for(self.part_checksums.len())
    }

    /// Number of segments the transaction spans.
    #[must_use]
    pub fn part_count(&self) -> u32 {
        self.part_checksums.len() as u32
    }

    /// Serializes the header, computing the header checksum.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&TRANSACTION_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.id.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.generation.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.removal_count.to_le_bytes());
        buf.extend_from_slice(&self.add_count.to_le_bytes());
        buf.extend_from_slice(&self.total_ondisk_nvo_header_size.to_le_bytes());
        buf.extend_from_slice(&self.total_ondisk_size.to_le_bytes());
        buf.extend_from_slice(&self.padding_size.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.part_count().to_le_bytes());
        for crc in &self.part_checksums {
            buf.extend_from_slice(&crc.to_le_bytes());
        }

        let crc = header_checksum(&buf);
        buf[offsets::HEADER_CHECKSUM].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and validates a transaction header from the start of `buf`.
    ///
    /// # Errors
    ///
    /// Fails on a short buffer, bad magic, an implausible part count or a
    /// header checksum mismatch.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(RECORD, buf, Self::FIXED_SIZE)?;

        let magic = le_u32(buf, offsets::MAGIC.start);
        if magic != TRANSACTION_MAGIC {
            return Err(FormatError::BadMagic {
                record: RECORD,
                found: magic,
            });
        }

        let part_count = le_u32(buf, offsets::PART_COUNT.start);
        if part_count == 0 || part_count > MAX_PARTS {
            return Err(FormatError::Inconsistent {
                record: RECORD,
                message: format!("implausible part count {part_count}"),
            });
        }
        let len = Self::encoded_len_for(part_count as usize);
        ensure_len(RECORD, buf, len)?;

        let stored = le_u32(buf, offsets::HEADER_CHECKSUM.start);
        let computed = header_checksum(&buf[..len]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                record: RECORD,
                stored,
                computed,
            });
        }

        let part_checksums = (0..part_count as usize)
            .map(|i| le_u32(buf, Self::FIXED_SIZE + 4 * i))
            .collect();

        Ok(Self {
            id: TransactionId::new(le_u64(buf, offsets::ID.start)),
            sequence: SequenceNumber::new(le_u64(buf, offsets::SEQUENCE.start)),
            generation: GenerationId::new(le_u64(buf, offsets::GENERATION.start)),
            removal_count: le_u32(buf, offsets::REMOVAL_COUNT.start),
            add_count: le_u32(buf, offsets::ADD_COUNT.start),
            total_ondisk_nvo_header_size: le_u32(buf, offsets::NVO_HEADER_SIZE.start),
            total_ondisk_size: le_u32(buf, offsets::TOTAL_ONDISK_SIZE.start),
            padding_size: le_u32(buf, offsets::PADDING_SIZE.start),
            part_checksums,
        })
    }
}

fn header_checksum(encoded: &[u8]) -> u32 {
    checksum(&[
        &encoded[..offsets::HEADER_CHECKSUM.start],
        &encoded[offsets::HEADER_CHECKSUM.end..],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(parts: usize) -> TransactionHeader {
        TransactionHeader {
            id: TransactionId::new(42),
            sequence: SequenceNumber::new(7),
            generation: GenerationId::new(3),
            removal_count: 1,
            add_count: 2,
            total_ondisk_nvo_header_size: 67,
            total_ondisk_size: 4096 * parts as u32,
            padding_size: 12,
            part_checksums: (0..parts as u32).map(|i| 0xA0A0_0000 | i).collect(),
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = sample(3);
        let encoded = header.encode();
        assert_eq!(encoded.len(), TransactionHeader::encoded_len_for(3));
        assert_eq!(TransactionHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn decode_from_segment_payload_with_trailing_body() {
        let header = sample(1);
        let mut payload = header.encode();
        payload.extend_from_slice(b"body bytes follow");
        assert_eq!(TransactionHeader::decode(&payload).unwrap(), header);
    }

    #[test]
    fn flipped_part_checksum_breaks_header_checksum() {
        let mut encoded = sample(2).encode();
        encoded[TransactionHeader::FIXED_SIZE + 4] ^= 0xFF;
        assert!(matches!(
            TransactionHeader::decode(&encoded),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn zero_parts_is_inconsistent() {
        let mut encoded = sample(1).encode();
        encoded[offsets::PART_COUNT].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            TransactionHeader::decode(&encoded),
            Err(FormatError::Inconsistent { .. })
        ));
    }

    #[test]
    fn part_count_beyond_buffer_is_truncated() {
        let mut encoded = sample(1).encode();
        encoded[offsets::PART_COUNT].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            TransactionHeader::decode(&encoded),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn bad_magic() {
        let mut encoded = sample(1).encode();
        encoded[0] ^= 0xFF;
        assert!(matches!(
            TransactionHeader::decode(&encoded),
            Err(FormatError::BadMagic { .. })
        ));
    }
}
