//! Superblock codec.

use super::{
    checksum, ensure_len, le_u16, le_u32, le_u64, FormatError, FORMAT_VERSION, MIN_SEGMENT_SIZE,
};
use crate::types::{GenerationId, SegmentId};
use serde::{Deserialize, Serialize};

/// Magic identifying a superblock ("LTFS").
pub const SUPERBLOCK_MAGIC: u32 = u32::from_le_bytes(*b"LTFS");

const RECORD: &str = "superblock";

pub(crate) mod offsets {
    use std::ops::Range;

    pub const MAGIC: Range<usize> = 0..4;
    pub const VERSION: Range<usize> = 4..6;
    pub const GENERATION: Range<usize> = 6..14;
    pub const SEGMENT_COUNT: Range<usize> = 14..18;
    pub const SEGMENT_SIZE: Range<usize> = 18..22;
    pub const REAL_HEAD: Range<usize> = 22..26;
    pub const CHECKSUM: Range<usize> = 26..30;
    pub const ENCODED_SIZE: usize = 30;
}

/// Durable description of a partition's journal.
///
/// The superblock is written after the segments of a commit are durable;
/// its head and generation are the commit point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    /// Format version.
    pub version: u16,
    /// Generation, bumped by every superblock update.
    pub generation: GenerationId,
    /// Number of segments in the ring.
    pub segment_count: u32,
    /// Size of each segment in bytes.
    pub segment_size: u32,
    /// Next segment to be written.
    pub real_head_segment_id: SegmentId,
}

impl Superblock {
    /// Encoded size in bytes.
    pub const ENCODED_SIZE: usize = offsets::ENCODED_SIZE;

    /// Superblock of a freshly formatted journal.
    #[must_use]
    pub fn fresh(segment_count: u32, segment_size: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            generation: GenerationId::new(1),
            segment_count,
            segment_size,
            real_head_segment_id: 0,
        }
    }

    /// Serializes the superblock with its checksum.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.extend_from_slice(&SUPERBLOCK_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.generation.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.segment_count.to_le_bytes());
        buf.extend_from_slice(&self.segment_size.to_le_bytes());
        buf.extend_from_slice(&self.real_head_segment_id.to_le_bytes());
        let crc = checksum(&[&buf]);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and validates a superblock.
    ///
    /// # Errors
    ///
    /// Fails on a short buffer, bad magic, checksum mismatch, unknown
    /// version, or a geometry that cannot describe a ring.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(RECORD, buf, Self::ENCODED_SIZE)?;

        let magic = le_u32(buf, offsets::MAGIC.start);
        if magic != SUPERBLOCK_MAGIC {
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

        let superblock = Self {
            version,
            generation: GenerationId::new(le_u64(buf, offsets::GENERATION.start)),
            segment_count: le_u32(buf, offsets::SEGMENT_COUNT.start),
            segment_size: le_u32(buf, offsets::SEGMENT_SIZE.start),
            real_head_segment_id: le_u32(buf, offsets::REAL_HEAD.start),
        };

        if superblock.segment_count < 2 || superblock.segment_size < MIN_SEGMENT_SIZE {
            return Err(FormatError::Inconsistent {
                record: RECORD,
                message: format!(
                    "unusable geometry: {} segments of {} bytes",
                    superblock.segment_count, superblock.segment_size
                ),
            });
        }
        if superblock.real_head_segment_id >= superblock.segment_count {
            return Err(FormatError::Inconsistent {
                record: RECORD,
                message: format!(
                    "head {} outside ring of {}",
                    superblock.real_head_segment_id, superblock.segment_count
                ),
            });
        }

        Ok(superblock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        Superblock {
            version: FORMAT_VERSION,
            generation: GenerationId::new(77),
            segment_count: 10,
            segment_size: 4096,
            real_head_segment_id: 3,
        }
    }

    #[test]
    fn superblock_roundtrip() {
        let sb = sample();
        let encoded = sb.encode();
        assert_eq!(encoded.len(), Superblock::ENCODED_SIZE);
        assert_eq!(Superblock::decode(&encoded).unwrap(), sb);
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut encoded = sample().encode();
        encoded.extend_from_slice(&[0u8; 100]);
        assert_eq!(Superblock::decode(&encoded).unwrap(), sample());
    }

    #[test]
    fn zeroed_region_is_bad_magic() {
        let result = Superblock::decode(&[0u8; 64]);
        assert!(matches!(result, Err(FormatError::BadMagic { found: 0, .. })));
    }

    #[test]
    fn flipped_field_fails_checksum() {
        let mut encoded = sample().encode();
        encoded[offsets::REAL_HEAD.start] ^= 0xFF;
        assert!(matches!(
            Superblock::decode(&encoded),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_superblock() {
        let encoded = sample().encode();
        assert!(matches!(
            Superblock::decode(&encoded[..10]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn head_outside_ring_is_inconsistent() {
        let mut sb = sample();
        sb.real_head_segment_id = 10;
        assert!(matches!(
            Superblock::decode(&sb.encode()),
            Err(FormatError::Inconsistent { .. })
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_superblock() -> impl Strategy<Value = Superblock> {
            (2u32..100_000, MIN_SEGMENT_SIZE..=1 << 24, any::<u64>())
                .prop_flat_map(|(count, size, generation)| {
                    (0..count).prop_map(move |head| Superblock {
                        version: FORMAT_VERSION,
                        generation: GenerationId::new(generation),
                        segment_count: count,
                        segment_size: size,
                        real_head_segment_id: head,
                    })
                })
        }

        proptest! {
            #[test]
            fn any_valid_superblock_roundtrips(sb in arb_superblock()) {
                let encoded = sb.encode();
                prop_assert_eq!(encoded.len(), Superblock::ENCODED_SIZE);
                prop_assert_eq!(Superblock::decode(&encoded).unwrap(), sb);
            }

            #[test]
            fn any_single_bit_flip_is_rejected(
                sb in arb_superblock(),
                byte in 0..offsets::ENCODED_SIZE,
                bit in 0u8..8,
            ) {
                let mut encoded = sb.encode();
                encoded[byte] ^= 1 << bit;
                prop_assert!(Superblock::decode(&encoded).is_err());
            }
        }
    }
}
