//! Checksum-framed segment storage over a mirror set.
//!
//! Segments are written whole. The store stamps a CRC-32 trailer over the
//! rest of the segment and verifies it on every read, so callers never see
//! unverified bytes.

mod store;

pub use store::SegmentStore;
