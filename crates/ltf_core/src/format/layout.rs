//! Placement of a transaction's payload stream into segments.

use super::txn_header::MAX_PARTS;
use super::{segment_payload_capacity, FormatError, TransactionHeader};
use std::ops::Range;

/// How a transaction of a given body size is split into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLayout {
    /// Number of segments used.
    pub part_count: u32,
    /// Encoded transaction header length.
    pub header_len: usize,
    /// Encoded body length.
    pub body_len: usize,
    /// Zero bytes after the body.
    pub padding: usize,
    /// Payload bytes per segment.
    pub capacity: usize,
    /// Segment size the layout was planned for.
    pub segment_size: u32,
}

impl PartLayout {
    /// Plans the smallest number of parts that holds the header and body.
    ///
    /// # Errors
    ///
    /// Fails if the segment cannot even hold a one-part header, or if the
    /// on-disk size of the transaction would not fit the header fields.
    pub fn plan(body_len: usize, segment_size: u32) -> Result<Self, FormatError> {
        let capacity = segment_payload_capacity(segment_size);
        // each part adds 4 bytes of part checksum to the header
        let per_part = capacity.checked_sub(4).filter(|&c| c > 0).ok_or_else(|| {
            FormatError::Inconsistent {
                record: "layout",
                message: format!("segment size {segment_size} too small"),
            }
        })?;

        let part_count = (TransactionHeader::FIXED_SIZE + body_len).div_ceil(per_part);
        // the header must fit entirely in the first part
        if TransactionHeader::encoded_len_for(part_count) > capacity {
            return Err(FormatError::Inconsistent {
                record: "layout",
                message: format!("{part_count} parts do not fit in one header"),
            });
        }

        let header_len = TransactionHeader::encoded_len_for(part_count);
        let total_stream = part_count * capacity;
        let padding = total_stream - header_len - body_len;

        let total_ondisk = part_count as u64 * u64::from(segment_size);
        if total_ondisk > u64::from(u32::MAX) || part_count > MAX_PARTS as usize {
            return Err(FormatError::Inconsistent {
                record: "layout",
                message: format!("transaction of {body_len} bytes is too large"),
            });
        }

        Ok(Self {
            part_count: part_count as u32,
            header_len,
            body_len,
            padding,
            capacity,
            segment_size,
        })
    }

    /// Rebuilds the layout a decoded header was written with.
    ///
    /// # Errors
    ///
    /// Fails if the header's sizes contradict each other or the segment
    /// size.
    pub fn from_header(header: &TransactionHeader, segment_size: u32) -> Result<Self, FormatError> {
        let inconsistent = |message: String| FormatError::Inconsistent {
            record: "transaction header",
            message,
        };
        let capacity = segment_payload_capacity(segment_size);
        let part_count = header.part_count();
        let header_len = header.encoded_len();

        if u64::from(header.total_ondisk_size) != u64::from(part_count) * u64::from(segment_size) {
            return Err(inconsistent(format!(
                "on-disk size {} is not {part_count} segments",
                header.total_ondisk_size
            )));
        }
        let stream = part_count as usize * capacity;
        let body_len = stream
            .checked_sub(header_len)
            .and_then(|rest| rest.checked_sub(header.padding_size as usize))
            .ok_or_else(|| inconsistent(format!("padding {} too large", header.padding_size)))?;
        if header.total_ondisk_nvo_header_size as usize > body_len {
            return Err(inconsistent(format!(
                "record headers of {} bytes exceed body of {body_len}",
                header.total_ondisk_nvo_header_size
            )));
        }

        Ok(Self {
            part_count,
            header_len,
            body_len,
            padding: header.padding_size as usize,
            capacity,
            segment_size,
        })
    }

    /// Bytes the transaction occupies on disk.
    #[must_use]
    pub fn total_ondisk_size(&self) -> u32 {
        self.part_count * self.segment_size
    }

    /// Range of the payload stream carried by part `index`.
    #[must_use]
    pub fn stream_range(&self, index: u32) -> Range<usize> {
        let start = index as usize * self.capacity;
        start..start + self.capacity
    }

    /// Range of part `index`'s payload that holds body bytes, relative to
    /// the start of that part's payload.
    ///
    /// Part checksums cover exactly these bytes.
    #[must_use]
    pub fn body_range_in_part(&self, index: u32) -> Range<usize> {
        let stream = self.stream_range(index);
        let body_start = self.header_len;
        let body_end = self.header_len + self.body_len;
        let start = stream.start.max(body_start).min(stream.end);
        let end = stream.end.min(body_end).max(start);
        start - stream.start..end - stream.start
    }
    /// Range of the body carried by part `index`, relative to the body.
    #[must_use]
    pub fn body_span(&self, index: u32) -> Range<usize> {
        let in_part = self.body_range_in_part(index);
        let base = self.stream_range(index).start + in_part.start;
        let start = base.saturating_sub(self.header_len).min(self.body_len);
        start..start + in_part.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_fits_one_part() {
        let layout = PartLayout::plan(100, 1024).unwrap();
        assert_eq!(layout.part_count, 1);
        assert_eq!(layout.header_len, 60);
        assert_eq!(layout.padding, 956 - 60 - 100);
        assert_eq!(layout.total_ondisk_size(), 1024);
        assert_eq!(layout.body_range_in_part(0), 60..160);
    }

    #[test]
    fn body_spills_into_continuation_parts() {
        let capacity = 956;
        let layout = PartLayout::plan(2000, 1024).unwrap();
        assert_eq!(layout.part_count, 3);
        let header_len = layout.header_len;
        assert_eq!(header_len, 56 + 12);
        assert_eq!(layout.body_range_in_part(0), header_len..capacity);
        assert_eq!(layout.body_range_in_part(1), 0..capacity);
        let last = 2000 - (capacity - header_len) - capacity;
        assert_eq!(layout.body_range_in_part(2), 0..last);
        assert_eq!(layout.padding, capacity - last);
    }

    #[test]
    fn exact_fit_has_no_padding() {
        let capacity = 956;
        let body_len = capacity - 60;
        let layout = PartLayout::plan(body_len, 1024).unwrap();
        assert_eq!(layout.part_count, 1);
        assert_eq!(layout.padding, 0);

        let layout = PartLayout::plan(body_len + 1, 1024).unwrap();
        assert_eq!(layout.part_count, 2);
    }

    #[test]
    fn body_spans_tile_the_body() {
        let layout = PartLayout::plan(2000, 1024).unwrap();
        assert_eq!(layout.body_span(0), 0..888);
        assert_eq!(layout.body_span(1), 888..1844);
        assert_eq!(layout.body_span(2), 1844..2000);
    }

    #[test]
    fn layout_is_rebuilt_from_header() {
        use crate::types::{GenerationId, SequenceNumber, TransactionId};

        let planned = PartLayout::plan(2000, 1024).unwrap();
        let header = TransactionHeader {
            id: TransactionId::new(1),
            sequence: SequenceNumber::new(1),
            generation: GenerationId::new(2),
            removal_count: 0,
            add_count: 1,
            total_ondisk_nvo_header_size: 25,
            total_ondisk_size: planned.total_ondisk_size(),
            padding_size: planned.padding as u32,
            part_checksums: vec![0; planned.part_count as usize],
        };
        assert_eq!(PartLayout::from_header(&header, 1024).unwrap(), planned);

        let mut bad = header.clone();
        bad.total_ondisk_size += 1;
        assert!(PartLayout::from_header(&bad, 1024).is_err());

        let mut bad = header;
        bad.padding_size = 10_000;
        assert!(PartLayout::from_header(&bad, 1024).is_err());
    }

    #[test]
    fn empty_body_still_needs_a_part() {
        let layout = PartLayout::plan(0, 1024).unwrap();
        assert_eq!(layout.part_count, 1);
        assert_eq!(layout.body_range_in_part(0), 60..60);
    }

    #[test]
    fn body_ranges_cover_body_exactly_once() {
        for body_len in [0usize, 1, 500, 895, 896, 897, 5000, 64 * 1024] {
            let layout = PartLayout::plan(body_len, 1024).unwrap();
            let covered: usize = (0..layout.part_count)
                .map(|i| layout.body_range_in_part(i).len())
                .sum();
            assert_eq!(covered, body_len, "body_len {body_len}");
            assert_eq!(
                layout.header_len + body_len + layout.padding,
                layout.part_count as usize * layout.capacity
            );
        }
    }
}
