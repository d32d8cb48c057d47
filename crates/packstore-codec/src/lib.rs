//! On-disk bucket format for packstore.
//!
//! A stored bucket is a protobuf [`Bucket`] record, compressed and prefixed
//! with a one-byte algorithm canary:
//!
//! ```text
//! +--------+---------------------------------------+
//! | canary | compressed protobuf Bucket            |
//! +--------+---------------------------------------+
//!    'S'  snappy (raw block format, default)
//!    'Z'  zstd
//!   other plain protobuf, passed through on decode
//! ```
//!
//! Compression is always applied on write. Reading accepts any of the three
//! forms, so the compressor can change without rewriting old buckets.
//!
//! The legacy v1 layout stored items as a repeated list; [`legacy_items`]
//! extracts them for migration.

pub mod codec;
pub mod compress;
pub mod error;
pub mod proto;

pub use codec::{legacy_items, BucketCodec};
pub use compress::CompressionKind;
pub use error::{CodecError, CodecResult};
pub use proto::{Bucket, ItemRecord};
