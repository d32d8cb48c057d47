//! Sharded packed-object store.
//!
//! A [`Packer`] keeps many small items in few storage entries. Each item ID
//! is hashed, and the hash routes the item to the deepest bucket whose key is
//! a prefix of it. Buckets start as one flat layer of roots and split into
//! `2^bucket_shard_bits` children whenever storage rejects them as too large.
//!
//! # Layout
//!
//! ```text
//! <config view>/config            {"base_bucket_bits": 8}
//! <bucket view>/v2/00             root, interior once split
//! <bucket view>/v2/00/3           child of 00
//! <bucket view>/v2/00/3/a         grandchild
//! <bucket view>/7f                v1 bucket (see LegacyReader)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use packstore::{Packer, PackerConfig};
//! use packstore_storage::{Context, InMemoryStorage, StorageView};
//! use packstore_types::Item;
//!
//! let backend = Arc::new(InMemoryStorage::new());
//! let ctx = Context::background();
//! let packer = Packer::open(
//!     &ctx,
//!     StorageView::new(backend.clone(), "packer/buckets/"),
//!     StorageView::new(backend, "packer/config/"),
//!     PackerConfig::default(),
//! )
//! .unwrap();
//!
//! packer.put_item(&ctx, Item::new("greeting", b"hello".to_vec())).unwrap();
//! let item = packer.get_item(&ctx, "greeting").unwrap().unwrap();
//! assert_eq!(item.data, b"hello");
//! ```

pub mod bucket;
pub mod cache;
pub mod config;
pub mod error;
pub mod invalidate;
pub mod legacy;
pub mod lock;
pub mod packer;
pub mod preload;
pub mod queue;
pub mod shard;

pub use bucket::LockedBucket;
pub use cache::BucketCache;
pub use config::{PackerConfig, CONFIG_KEY};
pub use error::{ErrorKind, MultiError, PackerError, PackerResult};
pub use invalidate::Invalidation;
pub use legacy::{LegacyReader, UpgradeOptions, UpgradeReport};
pub use lock::LockTable;
pub use packer::{Packer, PackerStats, BUCKET_VERSION_PREFIX};
pub use queue::BatchWriter;
pub use shard::MAX_LONE_ITEM_SPLITS;
