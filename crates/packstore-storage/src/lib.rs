//! Key-value storage collaborators for packstore.
//!
//! The packer never talks to a disk or a database directly. Everything it
//! persists goes through the [`Storage`] trait: a flat, `/`-separated key
//! space with atomic per-entry writes and one-level listing.
//!
//! # Backends
//!
//! - [`InMemoryStorage`] -- `BTreeMap`-based store for tests and embedding,
//!   with an optional size limit and failure injection
//! - [`FileStorage`] -- one file per key under a root directory
//!
//! [`StorageView`] scopes any backend to a key prefix, so a packer's config
//! and bucket data can live side by side in one backend.
//!
//! # Design Rules
//!
//! 1. A `put` over the size limit writes nothing and returns
//!    [`StorageError::ValueTooLarge`].
//! 2. Every call honours its [`Context`] before touching the backend.
//! 3. Backends never call back into the packer.

pub mod context;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;
pub mod view;

// Re-export primary types at crate root for ergonomic imports.
pub use context::Context;
pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::InMemoryStorage;
pub use traits::{collect_keys, collect_keys_with_prefix, Storage, StorageEntry};
pub use view::StorageView;
