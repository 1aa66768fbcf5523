//! Crash and restart scenarios.

use ltf_core::{
    CorruptionMode, CorruptionTarget, JournalConfig, Owner, SegmentField, SuperblockField,
    TransactionField,
};
use ltf_testkit::prelude::*;

#[test]
fn large_objects_survive_restart() {
    let config = JournalConfig::new().segment_count(16).segment_size(64 * 1024);
    let mut fixture = TestPartition::new(config, 2);

    let mut txn = fixture.create_transaction(Owner::WriteBuffer);
    let payloads: Vec<Vec<u8>> = (0..5).map(|i| payload(i, 64 * 1024)).collect();
    let ids: Vec<_> = payloads
        .iter()
        .map(|p| txn.add_object(TEST_OBJECT_TYPE, p.clone()).unwrap())
        .collect();
    let status = fixture.commit(&mut txn).unwrap();
    assert!(status.range.count > 1);

    fixture.restart();

    assert_eq!(fixture.object_count(), 5);
    for (id, expected) in ids.iter().zip(&payloads) {
        let object = fixture.get_object(*id).unwrap();
        assert_eq!(&object.payload, expected);
        assert_eq!(object.object_type, TEST_OBJECT_TYPE);
    }
    assert_eq!(fixture.recovery_report().transactions, 1);
    assert_eq!(fixture.head(), status.range.end());
}

#[test]
fn restart_resumes_counters() {
    let mut fixture = TestPartition::new(small_config(), 2);
    fixture.commit_objects(3, 100);
    let generation = fixture.generation();
    let sequence = fixture.next_sequence();

    fixture.restart();
    assert_eq!(fixture.generation(), generation);
    assert_eq!(fixture.next_sequence(), sequence);

    let (status, _) = fixture.commit_sizes(&[10], 99);
    assert_eq!(status.sequence, sequence);
    assert_eq!(status.generation, generation.next());
}

#[test]
fn sequences_are_gapless_after_restart() {
    let mut fixture = TestPartition::new(small_config(), 2);
    fixture.commit_objects(6, 50);
    fixture.restart();

    let state = fixture.recover_snapshot().unwrap();
    let sequences: Vec<u64> = state.transactions.iter().map(|t| t.sequence.as_u64()).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    for pair in state.transactions.windows(2) {
        assert!(pair[0].generation < pair[1].generation);
    }
}

#[test]
fn damaged_segment_header_truncates_history() {
    let mut fixture = TestPartition::new(small_config(), 2);
    let ids = fixture.commit_objects(5, 100);

    // checksum field of segment 3's header, on every mirror
    for mirror in 0..2 {
        fixture.damage_segment(mirror, 3, 30, 1);
    }
    fixture.restart();

    let report = fixture.recovery_report();
    assert_eq!(report.truncated_at, Some(3));
    assert_eq!(report.transactions, 3);
    assert_eq!(fixture.head(), 3);
    for id in &ids[..3] {
        assert!(fixture.get_object(*id).is_some());
    }
    for id in &ids[3..] {
        assert!(fixture.get_object(*id).is_none());
    }

    // the journal keeps working past the boundary
    let (status, new_ids) = fixture.commit_sizes(&[40], 7);
    assert_eq!(status.range.start, 3);
    fixture.restart();
    assert_eq!(fixture.recovery_report().truncated_at, None);
    assert_eq!(fixture.object_count(), 4);
    assert!(fixture.get_object(new_ids[0]).is_some());
}

#[test]
fn injected_header_corruption_matches_physical_damage() {
    let fixture = TestPartition::new(small_config(), 2);
    fixture.commit_objects(5, 100);

    fixture.inject_corruption(
        CorruptionTarget::Segment {
            segment_id: 3,
            field: SegmentField::Checksum,
        },
        CorruptionMode::FlipBits,
    );
    let state = fixture.recover_snapshot().unwrap();
    assert_eq!(state.truncated_at, Some(3));
    assert_eq!(state.head, 3);
    assert_eq!(state.objects.len(), 3);
}

#[test]
fn damaged_continuation_drops_only_its_transaction() {
    let mut fixture = TestPartition::new(small_config(), 2);
    let (_, before) = fixture.commit_sizes(&[100], 1);
    let (multi, lost) = fixture.commit_sizes(&[3000], 2);
    let (_, after) = fixture.commit_sizes(&[100], 3);
    assert_eq!(multi.range.start, 1);
    assert_eq!(multi.range.count, 4);

    for mirror in 0..2 {
        fixture.damage_segment(mirror, 2, 200, 2);
    }
    fixture.restart();

    let report = fixture.recovery_report();
    assert_eq!(report.truncated_at, None);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].txn_id, multi.txn_id);
    assert!(fixture.get_object(before[0]).is_some());
    assert!(fixture.get_object(lost[0]).is_none());
    assert!(fixture.get_object(after[0]).is_some());
    assert_eq!(fixture.head(), 6);
}

#[test]
fn corrupt_part_body_is_detected_by_part_checksum() {
    let fixture = TestPartition::new(small_config(), 2);
    let (multi, lost) = fixture.commit_sizes(&[3000], 1);
    let (_, kept) = fixture.commit_sizes(&[100], 2);

    fixture.inject_corruption(
        CorruptionTarget::PartBody { segment_id: 2 },
        CorruptionMode::FlipBits,
    );
    let state = fixture.recover_snapshot().unwrap();
    assert_eq!(state.dropped.len(), 1);
    assert_eq!(state.dropped[0].txn_id, multi.txn_id);
    assert!(state.dropped[0].reason.contains("checksum"));
    assert!(!state.objects.contains(lost[0]));
    assert!(state.objects.contains(kept[0]));
}

#[test]
fn inject_then_clear_reads_like_no_injection() {
    let fixture = TestPartition::new(small_config(), 2);
    fixture.commit_objects(4, 120);
    let clean = fixture.recover_snapshot().unwrap();

    let targets = [
        CorruptionTarget::Superblock(SuperblockField::RealHeadSegmentId),
        CorruptionTarget::Segment {
            segment_id: 1,
            field: SegmentField::GenerationId,
        },
        CorruptionTarget::Transaction {
            segment_id: 2,
            field: TransactionField::SequenceId,
        },
        CorruptionTarget::PartBody { segment_id: 0 },
    ];
    for target in targets {
        fixture.inject_corruption(target, CorruptionMode::FlipBits);
        fixture.clear_corruption();
        let state = fixture.recover_snapshot().unwrap();
        assert_eq!(state.head, clean.head);
        assert_eq!(state.tail, clean.tail);
        assert_eq!(state.transactions, clean.transactions);
        assert_eq!(state.objects.ids(), clean.objects.ids());
    }
}

#[test]
fn unreadable_superblock_is_fatal() {
    let fixture = TestPartition::new(small_config(), 2);
    fixture.commit_objects(1, 10);
    fixture.inject_corruption(
        CorruptionTarget::Superblock(SuperblockField::Magic),
        CorruptionMode::Zero,
    );
    let err = fixture.recover_snapshot().unwrap_err();
    assert!(matches!(err, ltf_core::CoreError::Recovery { .. }));
}

#[test]
fn transaction_header_corruption_truncates() {
    let fixture = TestPartition::new(small_config(), 2);
    fixture.commit_objects(4, 100);
    fixture.inject_corruption(
        CorruptionTarget::Transaction {
            segment_id: 2,
            field: TransactionField::HeaderChecksum,
        },
        CorruptionMode::FlipBits,
    );
    let state = fixture.recover_snapshot().unwrap();
    assert_eq!(state.truncated_at, Some(2));
    assert_eq!(state.transactions.len(), 2);
}

#[test]
fn disabled_recovery_starts_empty_at_head() {
    let fixture = TestPartition::new(small_config(), 2);
    fixture.commit_objects(3, 100);
    let partition = fixture
        .try_reopen(small_config().enable_recovery(false))
        .unwrap();
    assert_eq!(partition.object_count(), 0);
    assert_eq!(partition.head(), 3);
    assert_eq!(partition.tail(), 3);
    // numbering continues past what is on disk
    assert_eq!(partition.next_sequence().as_u64(), 4);
}
