//! On-disk format of the journal.
//!
//! Every mirror device has the same layout:
//!
//! ```text
//! | superblock region (4096) | segment 0 | segment 1 | ... | segment N-1 |
//! ```
//!
//! and every segment is framed the same way:
//!
//! ```text
//! | segment header (64) | payload (segment_size - 68) | crc32 trailer (4) |
//! ```
//!
//! A transaction occupies one or more consecutive segments ("parts"). Its
//! payload stream is the transaction header, then the body, then zero
//! padding up to the end of its last part:
//!
//! ```text
//! | txn header (56 + 4 * parts) | removals | adds | padding |
//! ```
//!
//! All integers are little-endian and fixed width. Header checksums are
//! CRC-32 over the other fields in declaration order.
//!
//! Decoding is pure: codecs return a typed record or a [`FormatError`]
//! naming the failed check. They never touch journal state.

mod body;
mod layout;
mod segment_header;
mod superblock;
mod txn_header;

pub use body::{ObjectRecord, TransactionBody};
pub use layout::PartLayout;
pub use segment_header::SegmentHeader;
pub use superblock::Superblock;
pub use txn_header::TransactionHeader;

pub(crate) use segment_header::offsets as segment_offsets;
pub(crate) use superblock::offsets as superblock_offsets;
pub(crate) use txn_header::offsets as txn_offsets;

use thiserror::Error;

/// Bytes reserved for the superblock at the start of every mirror.
pub const SUPERBLOCK_REGION_SIZE: u64 = 4096;

/// Segment sizes must be a multiple of this.
pub const SECTOR_SIZE: u32 = 512;

/// Smallest segment the layout supports.
pub const MIN_SEGMENT_SIZE: u32 = 1024;

/// Slot reserved for the segment header at the start of every segment.
pub const SEGMENT_HEADER_SIZE: usize = 64;

/// CRC-32 trailer at the end of every segment.
pub const SEGMENT_TRAILER_SIZE: usize = 4;

/// `first_transaction_offset` of a segment that continues a transaction.
pub const NO_TRANSACTION: u32 = u32::MAX;

/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// Errors produced while decoding on-disk records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The buffer is shorter than the record.
    #[error("{record}: truncated, need {needed} bytes, have {available}")]
    Truncated {
        /// Record being decoded.
        record: &'static str,
        /// Bytes the record needs.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// The magic number does not identify this record type.
    #[error("{record}: bad magic {found:#010x}")]
    BadMagic {
        /// Record being decoded.
        record: &'static str,
        /// Magic found on disk.
        found: u32,
    },

    /// The record was written by an unknown format version.
    #[error("{record}: unsupported version {found}")]
    UnsupportedVersion {
        /// Record being decoded.
        record: &'static str,
        /// Version found on disk.
        found: u16,
    },

    /// The stored checksum does not match the recomputed one.
    #[error("{record}: checksum mismatch, stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Record being decoded.
        record: &'static str,
        /// Checksum found on disk.
        stored: u32,
        /// Checksum computed over the decoded fields.
        computed: u32,
    },

    /// Fields decode but contradict each other.
    #[error("{record}: {message}")]
    Inconsistent {
        /// Record being decoded.
        record: &'static str,
        /// Description of the contradiction.
        message: String,
    },
}

/// CRC-32 (IEEE) over the concatenation of `chunks`.
#[must_use]
pub fn checksum(chunks: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize()
}

/// Usable payload bytes of one segment.
#[must_use]
pub const fn segment_payload_capacity(segment_size: u32) -> usize {
    (segment_size as usize).saturating_sub(SEGMENT_HEADER_SIZE + SEGMENT_TRAILER_SIZE)
}

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn ensure_len(
    record: &'static str,
    buf: &[u8],
    needed: usize,
) -> Result<(), FormatError> {
    if buf.len() < needed {
        return Err(FormatError::Truncated {
            record,
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        // "123456789" is the standard CRC-32/IEEE check input
        assert_eq!(checksum(&[b"123456789"]), 0xCBF4_3926);
    }

    #[test]
    fn checksum_is_over_concatenation() {
        assert_eq!(checksum(&[b"1234", b"56789"]), checksum(&[b"123456789"]));
    }

    #[test]
    fn payload_capacity() {
        assert_eq!(segment_payload_capacity(1024), 1024 - 68);
    }
}
