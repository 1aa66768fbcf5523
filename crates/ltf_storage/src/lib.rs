//! # LTF Storage
//!
//! Device abstraction underneath the LTF journal.
//!
//! A backend models one physical replica: a fixed-capacity, byte-addressable
//! region that is read and written at explicit offsets. Backends are **opaque
//! byte stores** - they know nothing about superblocks, segments or
//! transactions. The journal owns all format interpretation and decides what
//! alignment its writes have.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and simulated restarts (clones share data)
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use ltf_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut device = InMemoryBackend::new(1024);
//! device.write_at(512, b"hello world").unwrap();
//! let data = device.read_at(512, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
