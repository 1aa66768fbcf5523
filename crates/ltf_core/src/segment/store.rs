//! Segment store.

use crate::corruption::CorruptionState;
use crate::error::{CoreError, CoreResult};
use crate::format::{
    checksum, SegmentHeader, Superblock, SEGMENT_TRAILER_SIZE, SUPERBLOCK_REGION_SIZE,
};
use crate::mirror::{Ack, MirrorSet};
use crate::types::{GenerationId, SegmentId};
use tracing::{debug, warn};

/// Fixed-size segments of one journal, replicated across mirrors.
#[derive(Debug)]
pub struct SegmentStore {
    mirrors: MirrorSet,
    segment_count: u32,
    segment_size: u32,
    corruption: CorruptionState,
}

impl SegmentStore {
    /// Creates a store for a ring of `segment_count` segments.
    ///
    /// # Errors
    ///
    /// Fails if a mirror is too small to hold the superblock region and
    /// every segment.
    pub fn new(mirrors: MirrorSet, segment_count: u32, segment_size: u32) -> CoreResult<Self> {
        let needed = SUPERBLOCK_REGION_SIZE + u64::from(segment_count) * u64::from(segment_size);
        let capacity = mirrors.capacity();
        if capacity < needed {
            return Err(CoreError::config(format!(
                "mirror capacity {capacity} below journal size {needed}"
            )));
        }
        Ok(Self {
            mirrors,
            segment_count,
            segment_size,
            corruption: CorruptionState::new(),
        })
    }

    /// Number of segments in the ring.
    #[must_use]
    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    /// Size of each segment in bytes.
    #[must_use]
    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    /// The replica devices.
    #[must_use]
    pub fn mirrors(&self) -> &MirrorSet {
        &self.mirrors
    }

    /// Injected read-path corruption.
    #[must_use]
    pub fn corruption(&self) -> &CorruptionState {
        &self.corruption
    }

    fn segment_offset(&self, id: SegmentId) -> u64 {
        SUPERBLOCK_REGION_SIZE + u64::from(id) * u64::from(self.segment_size)
    }

    fn check_id(&self, id: SegmentId) -> CoreResult<()> {
        if id >= self.segment_count {
            return Err(CoreError::invalid_operation(format!(
                "segment {id} outside ring of {}",
                self.segment_count
            )));
        }
        Ok(())
    }

    /// Writes a whole segment, stamping its trailer.
    ///
    /// `segment` must be exactly `segment_size` bytes; its last four bytes
    /// are overwritten with the trailer.
    ///
    /// # Errors
    ///
    /// Rejects a wrong-sized buffer, and returns
    /// [`CoreError::PartialReplication`] if a mirror failed the write.
    pub fn write_segment(&self, id: SegmentId, mut segment: Vec<u8>) -> CoreResult<Ack> {
        self.check_id(id)?;
        if segment.len() != self.segment_size as usize {
            return Err(CoreError::invalid_operation(format!(
                "segment buffer of {} bytes, expected {}",
                segment.len(),
                self.segment_size
            )));
        }

        let body_end = segment.len() - SEGMENT_TRAILER_SIZE;
        let crc = checksum(&[&segment[..body_end]]);
        segment[body_end..].copy_from_slice(&crc.to_le_bytes());

        let ack = self
            .mirrors
            .replicate_write(self.segment_offset(id), &segment)?;
        debug!(segment = id, mirrors = ack.acked, "segment written");
        Ok(ack)
    }

    /// Reads a segment from the first mirror whose copy passes its trailer
    /// check, then applies injected corruption.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corruption`] if no mirror holds a valid copy.
    pub fn read_segment(&self, id: SegmentId) -> CoreResult<Vec<u8>> {
        self.read_with(id, None)
    }

    /// Reads a segment like [`read_segment`](Self::read_segment), but passes
    /// over mirror copies whose header carries a generation newer than
    /// `generation`. Such a copy was written by a commit that never reached
    /// its superblock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corruption`] if no mirror holds an acceptable
    /// copy.
    pub fn read_committed_segment(
        &self,
        id: SegmentId,
        generation: GenerationId,
    ) -> CoreResult<Vec<u8>> {
        self.read_with(id, Some(generation))
    }

    fn read_with(&self, id: SegmentId, newest: Option<GenerationId>) -> CoreResult<Vec<u8>> {
        self.check_id(id)?;
        let mut segment = self.mirrors.read_validated(
            &format!("segment {id}"),
            self.segment_offset(id),
            self.segment_size as usize,
            |bytes| {
                if !trailer_valid(&bytes) {
                    return Err("trailer checksum mismatch".to_string());
                }
                if let (Some(newest), Ok(header)) = (newest, SegmentHeader::decode(&bytes)) {
                    if header.generation > newest {
                        return Err(format!(
                            "uncommitted generation {} (newest committed {newest})",
                            header.generation
                        ));
                    }
                }
                Ok(bytes)
            },
        )?;
        self.corruption.apply_segment(id, &mut segment);
        Ok(segment)
    }

    /// Writes the superblock to every live mirror.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartialReplication`] if a mirror failed the write.
    pub fn write_superblock(&self, superblock: &Superblock) -> CoreResult<Ack> {
        let ack = self.mirrors.replicate_write(0, &superblock.encode())?;
        debug!(
            generation = superblock.generation.as_u64(),
            head = superblock.real_head_segment_id,
            "superblock written"
        );
        Ok(ack)
    }

    /// Reads the superblock, choosing the valid copy with the highest
    /// generation when mirrors disagree.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corruption`] if no mirror holds a valid copy.
    pub fn read_superblock(&self) -> CoreResult<Superblock> {
        let mut best: Option<Superblock> = None;
        let mut failures = Vec::new();

        for (mirror, result) in self.mirrors.read_all(0, Superblock::ENCODED_SIZE) {
            let decoded = result.map_err(CoreError::from).and_then(|mut bytes| {
                self.corruption.apply_superblock(&mut bytes);
                Superblock::decode(&bytes).map_err(CoreError::from)
            });
            match decoded {
                Ok(superblock) => {
                    if best.map_or(true, |b| superblock.generation > b.generation) {
                        best = Some(superblock);
                    }
                }
                Err(e) => {
                    warn!(mirror, error = %e, "superblock copy rejected");
                    failures.push(format!("mirror {mirror}: {e}"));
                }
            }
        }

        best.ok_or_else(|| CoreError::corruption("superblock", failures.join("; ")))
    }
}

fn trailer_valid(segment: &[u8]) -> bool {
    if segment.len() < SEGMENT_TRAILER_SIZE {
        return false;
    }
    let body_end = segment.len() - SEGMENT_TRAILER_SIZE;
    let stored = crate::format::le_u32(segment, body_end);
    stored == checksum(&[&segment[..body_end]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corruption::{CorruptionMode, CorruptionTarget, SuperblockField};
    use ltf_storage::{InMemoryBackend, StorageBackend};

    const COUNT: u32 = 4;
    const SIZE: u32 = 1024;

    fn store(n: usize) -> (Vec<InMemoryBackend>, SegmentStore) {
        let capacity = SUPERBLOCK_REGION_SIZE + u64::from(COUNT * SIZE);
        let backends: Vec<InMemoryBackend> =
            (0..n).map(|_| InMemoryBackend::new(capacity)).collect();
        let mirrors = MirrorSet::new(
            backends
                .iter()
                .map(|b| Box::new(b.clone()) as Box<dyn StorageBackend>)
                .collect(),
            true,
        )
        .unwrap();
        (backends, SegmentStore::new(mirrors, COUNT, SIZE).unwrap())
    }

    #[test]
    fn segment_roundtrip_stamps_trailer() {
        let (_, store) = store(2);
        let mut segment = vec![0u8; SIZE as usize];
        segment[100] = 42;
        store.write_segment(1, segment).unwrap();

        let read = store.read_segment(1).unwrap();
        assert_eq!(read[100], 42);
        assert!(trailer_valid(&read));
    }

    #[test]
    fn wrong_sized_buffer_is_rejected() {
        let (_, store) = store(1);
        assert!(store.write_segment(0, vec![0u8; 100]).is_err());
        assert!(store.write_segment(COUNT, vec![0u8; SIZE as usize]).is_err());
    }

    #[test]
    fn unwritten_segment_is_corrupt() {
        let (_, store) = store(1);
        assert!(store.read_segment(2).unwrap_err().is_corruption());
    }

    #[test]
    fn damaged_mirror_is_skipped() {
        let (backends, store) = store(3);
        store.write_segment(0, vec![7u8; SIZE as usize]).unwrap();
        backends[0].poke(SUPERBLOCK_REGION_SIZE + 10, &[0]);
        assert_eq!(store.read_segment(0).unwrap()[10], 7);
    }

    #[test]
    fn too_small_mirror_is_rejected() {
        let mirrors = MirrorSet::new(vec![Box::new(InMemoryBackend::new(100))], true).unwrap();
        assert!(SegmentStore::new(mirrors, COUNT, SIZE).is_err());
    }

    #[test]
    fn newest_superblock_wins() {
        let (backends, store) = store(2);
        let mut sb = Superblock::fresh(COUNT, SIZE);
        store.write_superblock(&sb).unwrap();

        sb.generation = GenerationId::new(5);
        sb.real_head_segment_id = 2;
        backends[1].poke(0, &sb.encode());

        assert_eq!(store.read_superblock().unwrap(), sb);
    }

    #[test]
    fn injected_superblock_corruption_is_read_only() {
        let (backends, store) = store(1);
        let sb = Superblock::fresh(COUNT, SIZE);
        store.write_superblock(&sb).unwrap();
        let before = backends[0].data();

        store.corruption().inject(
            CorruptionTarget::Superblock(SuperblockField::Magic),
            CorruptionMode::FlipBits,
        );
        assert!(store.read_superblock().unwrap_err().is_corruption());
        assert_eq!(backends[0].data(), before);

        store.corruption().clear();
        assert_eq!(store.read_superblock().unwrap(), sb);
    }

    #[test]
    fn committed_read_passes_over_newer_copies() {
        let (backends, store) = store(2);
        let header = |generation| {
            let mut segment = vec![0u8; SIZE as usize];
            let header = SegmentHeader::starting(1, 0, GenerationId::new(generation));
            segment[..SegmentHeader::ENCODED_SIZE].copy_from_slice(&header.encode());
            segment
        };
        store.write_segment(1, header(3)).unwrap();

        // mirror 0 alone received a write that was never committed
        let mut newer = header(4);
        let body_end = newer.len() - SEGMENT_TRAILER_SIZE;
        let crc = checksum(&[&newer[..body_end]]);
        newer[body_end..].copy_from_slice(&crc.to_le_bytes());
        backends[0].poke(store.segment_offset(1), &newer);

        let plain = SegmentHeader::decode(&store.read_segment(1).unwrap()).unwrap();
        assert_eq!(plain.generation, GenerationId::new(4));
        let committed = store
            .read_committed_segment(1, GenerationId::new(3))
            .unwrap();
        assert_eq!(
            SegmentHeader::decode(&committed).unwrap().generation,
            GenerationId::new(3)
        );

        backends[1].poke(store.segment_offset(1), &newer);
        assert!(store
            .read_committed_segment(1, GenerationId::new(3))
            .unwrap_err()
            .is_corruption());
    }
}
