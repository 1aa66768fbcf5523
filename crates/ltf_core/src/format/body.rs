//! Transaction body records.

use super::{ensure_len, le_u32, FormatError};
use crate::types::{ObjectId, ObjectType};

const RECORD: &str = "transaction body";

const KIND_ADD: u8 = 1;
const KIND_REMOVE: u8 = 2;

/// An object carried by an add record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object id.
    pub id: ObjectId,
    /// Application type tag.
    pub object_type: ObjectType,
    /// Object bytes.
    pub payload: Vec<u8>,
}

/// Removals and adds of one transaction, in commit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionBody {
    /// Objects removed by the transaction.
    pub removals: Vec<ObjectId>,
    /// Objects added by the transaction.
    pub adds: Vec<ObjectRecord>,
}

impl TransactionBody {
    /// Size of a removal record.
    pub const REMOVAL_RECORD_SIZE: usize = 1 + 16;

    /// Size of an add record without its payload.
    pub const ADD_RECORD_HEADER_SIZE: usize = 1 + 16 + 4 + 4;

    /// Bytes of record headers, everything except payloads.
    #[must_use]
    pub fn object_header_size(&self) -> usize {
        self.removals.len() * Self::REMOVAL_RECORD_SIZE
            + self.adds.len() * Self::ADD_RECORD_HEADER_SIZE
    }

    /// Encoded length of the body.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.object_header_size() + self.adds.iter().map(|a| a.payload.len()).sum::<usize>()
    }

    /// Serializes removals then adds.
    ///
    /// Payload lengths are bounded to `u32` when objects are added to a
    /// transaction.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        for id in &self.removals {
            buf.push(KIND_REMOVE);
            buf.extend_from_slice(id.as_bytes());
        }
        for add in &self.adds {
            buf.push(KIND_ADD);
            buf.extend_from_slice(add.id.as_bytes());
            buf.extend_from_slice(&add.object_type.as_u32().to_le_bytes());
            buf.extend_from_slice(&(add.payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&add.payload);
        }
        buf
    }

    /// Decodes `removal_count` removals followed by `add_count` adds.
    ///
    /// Bytes after the last record (padding) are ignored.
    ///
    /// # Errors
    ///
    /// Fails if a record has the wrong kind or runs past the buffer.
    pub fn decode(buf: &[u8], removal_count: u32, add_count: u32) -> Result<Self, FormatError> {
        let mut pos = 0usize;
        let mut removals = Vec::with_capacity(removal_count.min(1024) as usize);
        for _ in 0..removal_count {
            ensure_len(RECORD, buf, pos + Self::REMOVAL_RECORD_SIZE)?;
            expect_kind(buf[pos], KIND_REMOVE)?;
            removals.push(read_id(buf, pos + 1));
            pos += Self::REMOVAL_RECORD_SIZE;
        }

        let mut adds = Vec::with_capacity(add_count.min(1024) as usize);
        for _ in 0..add_count {
            ensure_len(RECORD, buf, pos + Self::ADD_RECORD_HEADER_SIZE)?;
            expect_kind(buf[pos], KIND_ADD)?;
            let id = read_id(buf, pos + 1);
            let object_type = ObjectType::new(le_u32(buf, pos + 17));
            let len = le_u32(buf, pos + 21) as usize;
            pos += Self::ADD_RECORD_HEADER_SIZE;
            ensure_len(RECORD, buf, pos + len)?;
            adds.push(ObjectRecord {
                id,
                object_type,
                payload: buf[pos..pos + len].to_vec(),
            });
            pos += len;
        }

        Ok(Self { removals, adds })
    }
}

fn expect_kind(found: u8, expected: u8) -> Result<(), FormatError> {
    if found != expected {
        return Err(FormatError::Inconsistent {
            record: RECORD,
            message: format!("record kind {found}, expected {expected}"),
        });
    }
    Ok(())
}

fn read_id(buf: &[u8], at: usize) -> ObjectId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&buf[at..at + 16]);
    ObjectId::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> TransactionBody {
        TransactionBody {
            removals: vec![ObjectId::new(), ObjectId::new()],
            adds: vec![
                ObjectRecord {
                    id: ObjectId::new(),
                    object_type: ObjectType::new(3),
                    payload: b"hello".to_vec(),
                },
                ObjectRecord {
                    id: ObjectId::new(),
                    object_type: ObjectType::new(4),
                    payload: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn body_roundtrip_with_padding() {
        let body = body();
        let mut encoded = body.encode();
        assert_eq!(encoded.len(), body.encoded_len());
        encoded.extend_from_slice(&[0u8; 32]);
        assert_eq!(TransactionBody::decode(&encoded, 2, 2).unwrap(), body);
    }

    #[test]
    fn object_header_size_counts_prefixes() {
        assert_eq!(body().object_header_size(), 2 * 17 + 2 * 25);
    }

    #[test]
    fn wrong_kind_is_inconsistent() {
        let body = body();
        let encoded = body.encode();
        // ask for three removals; the third record is an add
        assert!(matches!(
            TransactionBody::decode(&encoded, 3, 1),
            Err(FormatError::Inconsistent { .. })
        ));
    }

    #[test]
    fn payload_past_end_is_truncated() {
        let encoded = body().encode();
        assert!(matches!(
            TransactionBody::decode(&encoded[..encoded.len() - 3], 2, 2),
            Err(FormatError::Truncated { .. })
        ));
    }
}
