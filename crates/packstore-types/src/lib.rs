//! Foundation types for packstore.
//!
//! Every other packstore crate depends on `packstore-types`. It defines how a
//! client item ID becomes a routing coordinate and how bucket keys are laid
//! out in the shard tree.
//!
//! # Key Types
//!
//! - [`HashKey`]: 64-char lowercase hex BLAKE2b-256 hash of an item ID
//! - [`Item`]: a logical record (`id` + opaque `data`)
//! - [`ShardGeometry`]: root width and shard fan-out; child/parent key arithmetic
//!
//! # Keys
//!
//! A bucket's storage key looks like `"00/3/a"`: the first segment is a root
//! (`base_bucket_bits / 4` hex digits) and every further segment is one shard
//! level (`bucket_shard_bits / 4` hex digits). Its *cache key* is the same
//! string with the slashes removed (`"003a"`), which makes it directly
//! comparable, by prefix, against item hash keys.

pub mod error;
pub mod geometry;
pub mod hash;
pub mod item;

pub use error::TypeError;
pub use geometry::{cache_key, ShardGeometry};
pub use hash::HashKey;
pub use item::Item;
