//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::format::{ObjectRecord, TransactionBody};
use crate::types::{ObjectId, ObjectType, Owner, TransactionId};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can record operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A transaction being built.
///
/// Nothing recorded here is visible to readers until the transaction is
/// committed through its partition.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    owner: Owner,
    state: TransactionState,
    removals: Vec<ObjectId>,
    adds: Vec<ObjectRecord>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, owner: Owner) -> Self {
        Self {
            id,
            owner,
            state: TransactionState::Active,
            removals: Vec::new(),
            adds: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the subsystem that created the transaction.
    #[must_use]
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns true if the transaction records no operation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.adds.is_empty()
    }

    /// Objects the transaction will remove.
    #[must_use]
    pub fn removals(&self) -> &[ObjectId] {
        &self.removals
    }

    /// Objects the transaction will add, in order.
    #[must_use]
    pub fn adds(&self) -> &[ObjectRecord] {
        &self.adds
    }

    /// Records the addition of a new object and returns its id.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is finished or the payload is larger than
    /// `u32::MAX` bytes.
    pub fn add_object(&mut self, object_type: ObjectType, payload: Vec<u8>) -> CoreResult<ObjectId> {
        let id = ObjectId::new();
        self.add_existing(id, object_type, payload)?;
        Ok(id)
    }

    /// Records the addition of an object under a known id.
    pub(crate) fn add_existing(
        &mut self,
        id: ObjectId,
        object_type: ObjectType,
        payload: Vec<u8>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        if u32::try_from(payload.len()).is_err() {
            return Err(CoreError::invalid_operation(format!(
                "object payload of {} bytes is too large",
                payload.len()
            )));
        }
        self.adds.push(ObjectRecord {
            id,
            object_type,
            payload,
        });
        Ok(())
    }

    /// Records the removal of `id`.
    ///
    /// Removing an object added earlier in this transaction cancels the add.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is finished.
    pub fn remove_object(&mut self, id: ObjectId) -> CoreResult<()> {
        self.ensure_active()?;
        if let Some(pos) = self.adds.iter().position(|add| add.id == id) {
            self.adds.remove(pos);
            return Ok(());
        }
        if !self.removals.contains(&id) {
            self.removals.push(id);
        }
        Ok(())
    }

    /// Abandons the transaction.
    pub fn abort(&mut self) {
        if self.is_active() {
            self.state = TransactionState::Aborted;
        }
    }

    /// Body to be written at commit.
    pub(crate) fn body(&self) -> TransactionBody {
        TransactionBody {
            removals: self.removals.clone(),
            adds: self.adds.clone(),
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if !self.is_active() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is {:?}",
                self.id, self.state
            )));
        }
        Ok(())
    }
}
