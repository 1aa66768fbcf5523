//! # LTF Testkit
//!
//! Test utilities for the LTF journal.
//!
//! This crate provides:
//! - Partition fixtures over in-memory mirrors that survive a simulated restart
//! - A fault-injecting storage backend for replication failures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ltf_testkit::prelude::*;
//!
//! #[test]
//! fn survives_restart() {
//!     let mut fixture = TestPartition::new(small_config(), 2);
//!     let ids = fixture.commit_objects(3, 100);
//!     fixture.restart();
//!     assert_eq!(fixture.object_count(), ids.len());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
