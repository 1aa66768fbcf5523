//! Committed object index.

use crate::format::ObjectRecord;
use crate::types::{ObjectId, ObjectType, TransactionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A committed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Object id.
    pub id: ObjectId,
    /// Application type tag.
    pub object_type: ObjectType,
    /// Object bytes.
    pub payload: Vec<u8>,
    /// Transaction whose segments currently hold the object.
    pub owner: TransactionId,
}

/// Objects visible to readers. Only committed transactions are applied.
#[derive(Debug, Default)]
pub struct ObjectIndex {
    objects: RwLock<HashMap<ObjectId, Object>>,
}

impl ObjectIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the object with `id`.
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<Object> {
        self.objects.read().get(&id).cloned()
    }

    /// Returns true if `id` is live.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.read().contains_key(&id)
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if no object is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Ids of all live objects, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Applies a committed transaction: removals first, then adds.
    ///
    /// Removing an unknown id is a no-op. An add of an existing id moves the
    /// object to `owner`.
    pub fn apply(&self, owner: TransactionId, removals: &[ObjectId], adds: Vec<ObjectRecord>) {
        let mut objects = self.objects.write();
        for id in removals {
            objects.remove(id);
        }
        for add in adds {
            objects.insert(
                add.id,
                Object {
                    id: add.id,
                    object_type: add.object_type,
                    payload: add.payload,
                    owner,
                },
            );
        }
    }

    /// Objects among `candidates` still owned by `owner`.
    #[must_use]
    pub fn live_owned_by(&self, owner: TransactionId, candidates: &[ObjectId]) -> Vec<Object> {
        let objects = self.objects.read();
        candidates
            .iter()
            .filter_map(|id| objects.get(id))
            .filter(|object| object.owner == owner)
            .cloned()
            .collect()
    }

    /// Drops the objects among `candidates` still owned by `owner`.
    ///
    /// Returns how many were dropped.
    pub fn drop_owned_by(&self, owner: TransactionId, candidates: &[ObjectId]) -> usize {
        let mut objects = self.objects.write();
        let mut dropped = 0;
        for id in candidates {
            if objects.get(id).is_some_and(|o| o.owner == owner) {
                objects.remove(id);
                dropped += 1;
            }
        }
        dropped
    }
}
