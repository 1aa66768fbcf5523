//! Property-based test generators using proptest.
//!
//! Provides strategies for generating journal records that satisfy the
//! invariants their decoders check.

use ltf_core::format::{ObjectRecord, TransactionBody, MIN_SEGMENT_SIZE, SECTOR_SIZE};
use ltf_core::{
    GenerationId, ObjectId, ObjectType, SegmentHeader, SequenceNumber, Superblock,
    TransactionHeader, TransactionId,
};
use proptest::prelude::*;

/// Strategy for generating object ids.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    prop::array::uniform16(any::<u8>()).prop_map(ObjectId::from_bytes)
}

/// Strategy for generating object payloads (arbitrary bytes).
pub fn payload_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..max_len)
}

/// Strategy for generating add records.
pub fn object_record_strategy() -> impl Strategy<Value = ObjectRecord> {
    (object_id_strategy(), any::<u32>(), payload_strategy(512)).prop_map(
        |(id, tag, payload)| ObjectRecord {
            id,
            object_type: ObjectType::new(tag),
            payload,
        },
    )
}

/// Strategy for generating transaction bodies.
pub fn transaction_body_strategy() -> impl Strategy<Value = TransactionBody> {
    (
        prop::collection::vec(object_id_strategy(), 0..8),
        prop::collection::vec(object_record_strategy(), 0..8),
    )
        .prop_map(|(removals, adds)| TransactionBody { removals, adds })
}

/// Strategy for generating valid segment sizes (sector multiples).
pub fn segment_size_strategy() -> impl Strategy<Value = u32> {
    (MIN_SEGMENT_SIZE / SECTOR_SIZE..=64u32).prop_map(|sectors| sectors * SECTOR_SIZE)
}

/// Strategy for generating valid superblocks.
pub fn superblock_strategy() -> impl Strategy<Value = Superblock> {
    (2u32..4096, segment_size_strategy(), 1u64..u64::MAX)
        .prop_flat_map(|(count, size, generation)| {
            (0..count).prop_map(move |head| {
                let mut superblock = Superblock::fresh(count, size);
                superblock.generation = GenerationId::new(generation);
                superblock.real_head_segment_id = head;
                superblock
            })
        })
}

/// Strategy for generating starting and continuation segment headers.
pub fn segment_header_strategy() -> impl Strategy<Value = SegmentHeader> {
    (any::<bool>(), 0u32..4096, 0u32..4096, 0u32..4096, any::<u64>()).prop_map(
        |(continuation, id, start, tail, generation)| {
            let generation = GenerationId::new(generation);
            if continuation {
                SegmentHeader::continuation(id, start, tail, generation)
            } else {
                SegmentHeader::starting(id, tail, generation)
            }
        },
    )
}

/// Strategy for generating transaction headers.
///
/// Size fields are arbitrary; only the header codec's own checks hold.
pub fn transaction_header_strategy() -> impl Strategy<Value = TransactionHeader> {
    (
        any::<u64>(),
        any::<u64>(),
        any::<u64>(),
        (any::<u32>(), any::<u32>(), any::<u32>()),
        (any::<u32>(), any::<u32>()),
        prop::collection::vec(any::<u32>(), 1..16),
    )
        .prop_map(
            |(id, sequence, generation, (removals, adds, nvo), (total, padding), checksums)| {
                TransactionHeader {
                    id: TransactionId::new(id),
                    sequence: SequenceNumber::new(sequence),
                    generation: GenerationId::new(generation),
                    removal_count: removals,
                    add_count: adds,
                    total_ondisk_nvo_header_size: nvo,
                    total_ondisk_size: total,
                    padding_size: padding,
                    part_checksums: checksums,
                }
            },
        )
}

/// Strategy for generating a batch of object sizes for one transaction.
pub fn object_sizes_strategy(max_objects: usize, max_size: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..max_size, 1..=max_objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_superblocks_decode(superblock in superblock_strategy()) {
            prop_assert_eq!(Superblock::decode(&superblock.encode()).unwrap(), superblock);
        }

        #[test]
        fn generated_segment_sizes_are_sector_multiples(size in segment_size_strategy()) {
            prop_assert_eq!(size % SECTOR_SIZE, 0);
            prop_assert!(size >= MIN_SEGMENT_SIZE);
        }
    }
}
