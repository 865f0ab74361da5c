//! # clustertx storage
//!
//! Byte-store backends for the clustertx session ledger.
//!
//! Backends are **opaque byte stores**: the ledger owns the slot format
//! and the backend only knows how to read, append, truncate and sync.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Shared in-memory buffer, with torn-write
//!   simulation for crash tests
//! - [`FileBackend`] - One file on the local file system
//!
//! ## Example
//!
//! ```rust
//! use clustertx_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(b"slot contents").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"slot contents");
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
