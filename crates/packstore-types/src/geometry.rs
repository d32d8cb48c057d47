//! Shard-tree key arithmetic.
//!
//! [`ShardGeometry`] fixes the width of root keys and the fan-out of a split.
//! All functions here are pure string arithmetic over hex keys; nothing
//! touches storage.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::HashKey;

/// Convert a bucket storage key (`"00/3/a"`) to its cache key (`"003a"`).
pub fn cache_key(bucket_key: &str) -> String {
    bucket_key.chars().filter(|c| *c != '/').collect()
}

/// Width parameters of the shard tree.
///
/// Invariants (checked by [`ShardGeometry::new`]):
/// - both widths are positive multiples of 4 bits, at least 4
/// - `base_bucket_bits <= 32`, `bucket_shard_bits <= 16`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardGeometry {
    base_bucket_bits: u32,
    bucket_shard_bits: u32,
}

impl ShardGeometry {
    pub const MAX_BASE_BUCKET_BITS: u32 = 32;
    pub const MAX_BUCKET_SHARD_BITS: u32 = 16;

    /// Validate and build a geometry.
    pub fn new(base_bucket_bits: u32, bucket_shard_bits: u32) -> Result<Self, TypeError> {
        check_bits("BaseBucketBits", base_bucket_bits, Self::MAX_BASE_BUCKET_BITS)?;
        check_bits(
            "BucketShardBits",
            bucket_shard_bits,
            Self::MAX_BUCKET_SHARD_BITS,
        )?;
        Ok(Self {
            base_bucket_bits,
            bucket_shard_bits,
        })
    }

    pub fn base_bucket_bits(&self) -> u32 {
        self.base_bucket_bits
    }

    pub fn bucket_shard_bits(&self) -> u32 {
        self.bucket_shard_bits
    }

    /// Hex digits in a root key.
    pub fn root_width(&self) -> usize {
        (self.base_bucket_bits / 4) as usize
    }

    /// Hex digits added by one shard level.
    pub fn shard_width(&self) -> usize {
        (self.bucket_shard_bits / 4) as usize
    }

    /// Number of root buckets (`2^base_bucket_bits`).
    pub fn root_count(&self) -> u64 {
        1u64 << self.base_bucket_bits
    }

    /// Number of children produced by one split (`2^bucket_shard_bits`).
    pub fn fan_out(&self) -> usize {
        1usize << self.bucket_shard_bits
    }

    /// Root cache key for a hash key or any prefix at least root-width long.
    pub fn root_key<'a>(&self, key: &'a str) -> Result<&'a str, TypeError> {
        let width = self.root_width();
        if key.len() < width || !key.is_char_boundary(width) {
            return Err(TypeError::KeyTooShort {
                key: key.to_string(),
                width,
            });
        }
        Ok(&key[..width])
    }

    /// Storage key of child `index` of `parent_key`.
    pub fn child_key(&self, parent_key: &str, index: usize) -> String {
        format!("{parent_key}/{index:0width$x}", width = self.shard_width())
    }

    /// Storage keys of all children of `parent_key`, in shard order.
    pub fn child_keys(&self, parent_key: &str) -> Vec<String> {
        (0..self.fan_out())
            .map(|i| self.child_key(parent_key, i))
            .collect()
    }

    /// Index of the child of `parent_cache_key` that `hash` routes to.
    pub fn child_index(&self, parent_cache_key: &str, hash: &str) -> Result<usize, TypeError> {
        let not_under = || TypeError::NotUnderBucket {
            hash: hash.to_string(),
            cache_key: parent_cache_key.to_string(),
        };
        let rest = hash.strip_prefix(parent_cache_key).ok_or_else(not_under)?;
        let digits = rest.get(..self.shard_width()).ok_or_else(not_under)?;
        usize::from_str_radix(digits, 16).map_err(|_| TypeError::InvalidHex(digits.to_string()))
    }

    /// Whether a bucket with this cache key can be split again while keeping
    /// its children's cache keys proper prefixes of a hash key.
    pub fn can_split(&self, cache_key: &str) -> bool {
        cache_key.len() + self.shard_width() < HashKey::LEN
    }

    /// Cache key of the parent bucket, or `None` for a root.
    pub fn parent_cache_key<'a>(&self, cache_key: &'a str) -> Option<&'a str> {
        let len = cache_key.len();
        if len < self.root_width() + self.shard_width() {
            return None;
        }
        Some(&cache_key[..len - self.shard_width()])
    }

    /// Shard depth of a cache key (0 for roots).
    pub fn depth(&self, cache_key: &str) -> usize {
        cache_key.len().saturating_sub(self.root_width()) / self.shard_width()
    }

    /// Validate a bucket storage key and return its cache key.
    pub fn parse_bucket_key(&self, bucket_key: &str) -> Result<String, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidBucketKey {
            key: bucket_key.to_string(),
            reason: reason.to_string(),
        };
        let mut segments = bucket_key.split('/');
        let root = segments.next().unwrap_or_default();
        if root.len() != self.root_width() {
            return Err(invalid("root segment has the wrong width"));
        }
        for segment in segments {
            if segment.len() != self.shard_width() {
                return Err(invalid("shard segment has the wrong width"));
            }
        }
        let cache_key = cache_key(bucket_key);
        if !cache_key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(invalid("not lowercase hex"));
        }
        if cache_key.len() >= HashKey::LEN {
            return Err(invalid("deeper than the hash key"));
        }
        Ok(cache_key)
    }

    /// Rebuild a storage key from a cache key.
    pub fn bucket_key_from_cache_key(&self, cache_key: &str) -> Result<String, TypeError> {
        let root = self.root_key(cache_key)?;
        let mut key = root.to_string();
        let rest = &cache_key[root.len()..];
        if rest.len() % self.shard_width() != 0 {
            return Err(TypeError::InvalidBucketKey {
                key: cache_key.to_string(),
                reason: "not aligned to the shard width".into(),
            });
        }
        for chunk in rest.as_bytes().chunks(self.shard_width()) {
            key.push('/');
            key.push_str(std::str::from_utf8(chunk).map_err(|e| TypeError::InvalidHex(e.to_string()))?);
        }
        Ok(key)
    }
}

impl Default for ShardGeometry {
    fn default() -> Self {
        Self {
            base_bucket_bits: 8,
            bucket_shard_bits: 4,
        }
    }
}

fn check_bits(name: &'static str, bits: u32, max: u32) -> Result<(), TypeError> {
    if bits < 4 {
        return Err(TypeError::BitsTooSmall { name, bits });
    }
    if bits % 4 != 0 {
        return Err(TypeError::BitsNotMultipleOfFour { name, bits });
    }
    if bits > max {
        return Err(TypeError::BitsTooLarge { name, bits, max });
    }
    Ok(())
}
