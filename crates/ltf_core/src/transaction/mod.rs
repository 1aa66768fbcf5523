//! Transactions of object adds and removals.
//!
//! A transaction is built in memory and committed synchronously:
//! - **Atomicity**: either every add and removal becomes visible, or none
//! - **Durability**: commit returns after segments and superblock are synced
//! - **Ordering**: commits run one at a time in FIFO order and receive
//!   gapless, increasing sequence numbers

mod manager;
mod queue;
mod state;

pub(crate) use manager::Counters;
pub use manager::{CommitOutcome, CommitStatus, TransactionManager};
pub use state::{Transaction, TransactionState};
