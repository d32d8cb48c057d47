//! Reconciling the cache against buckets replicated from elsewhere.

use std::sync::Arc;

use tracing::debug;

use packstore_codec::Bucket;
use packstore_storage::Context;
use packstore_types::{Item, ShardGeometry};

use crate::bucket::LockedBucket;
use crate::cache::BucketCache;
use crate::error::{PackerError, PackerResult};
use crate::packer::Packer;

/// Items affected by one invalidation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Items known to exist after the invalidation: everything in the new
    /// bucket, plus dropped items that another cached bucket still holds.
    pub present: Vec<Item>,
    /// Items the replaced bucket held that no cached bucket holds any more.
    pub deleted: Vec<Item>,
}

impl Packer {
    /// Replace the cached bucket at `path` with `value`, or drop it when
    /// `value` is `None` (deleted at the source).
    ///
    /// `path` is a full backend key under this packer's bucket storage.
    /// Arrival order across buckets does not matter: an item is only
    /// reported deleted when no bucket in the cache still holds it.
    pub fn invalidate_items(
        &self,
        ctx: &Context,
        path: &str,
        value: Option<&[u8]>,
    ) -> PackerResult<Invalidation> {
        const OP: &str = "invalidate";
        let geometry = self.ready(ctx, OP)?;
        let bucket_key = self.storage.truncate_key(path).ok_or_else(|| {
            PackerError::arg(
                OP,
                format!("path {path:?} is outside {:?}", self.storage.prefix()),
            )
        })?;
        let cache_key = geometry
            .parse_bucket_key(bucket_key)
            .map_err(PackerError::invalid_arg(OP))?;
        let replacement = match value {
            None => Bucket::leaf(bucket_key),
            Some(bytes) => {
                let bucket = self.codec.decode(bytes).map_err(PackerError::codec(OP))?;
                if bucket.key != bucket_key {
                    return Err(PackerError::arg(
                        OP,
                        format!(
                            "decoded bucket key {:?} does not match path key {bucket_key:?}",
                            bucket.key
                        ),
                    ));
                }
                bucket
            }
        };

        let lock_index = self.locks.index_for(&cache_key);
        let (original, _guards) = loop {
            let original = self.cache_read().longest_prefix(&cache_key);
            let guards = self
                .locks
                .write_many(std::iter::once(lock_index).chain(original.as_ref().map(|lb| lb.lock_index())));
            let current = self.cache_read().longest_prefix(&cache_key);
            let unchanged = match (&original, &current) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                break (original, guards);
            }
        };

        let mut result = Invalidation::default();
        if replacement.is_leaf() {
            result.present.extend(
                replacement
                    .item_map
                    .values()
                    .map(|r| Item::new(r.id.clone(), r.data.clone())),
            );
        }

        if let Some(original) = original.as_ref().filter(|lb| lb.key() == bucket_key) {
            let previous = original.snapshot();
            if previous.is_leaf() {
                let cache = self.cache_read();
                for (hash, record) in previous.item_map {
                    if replacement.is_leaf() && replacement.item_map.contains_key(&hash) {
                        continue;
                    }
                    match find_elsewhere(&cache, &geometry, &hash, original) {
                        Some(item) => result.present.push(item),
                        None => result.deleted.push(Item::new(record.id, record.data)),
                    }
                }
            }
        }

        let mut cache = self.cache_write();
        if value.is_some() {
            let lb = Arc::new(LockedBucket::new(replacement, cache_key, lock_index));
            self.cache_insert(&mut cache, lb)?;
        } else if let Some(removed) = cache.delete(&cache_key) {
            removed.retire();
        }
        drop(cache);

        debug!(
            name = %self.config.name,
            key = bucket_key,
            removed = value.is_none(),
            present = result.present.len(),
            deleted = result.deleted.len(),
            "invalidated bucket"
        );
        Ok(result)
    }
}

/// Find `hash` in a cached bucket other than `original`: first the deepest
/// bucket covering it, then each ancestor of `original`.
fn find_elsewhere(
    cache: &BucketCache,
    geometry: &ShardGeometry,
    hash: &str,
    original: &Arc<LockedBucket>,
) -> Option<Item> {
    let holds = |lb: Arc<LockedBucket>| -> Option<Item> {
        if Arc::ptr_eq(&lb, original) {
            return None;
        }
        let state = lb.read();
        if state.has_shards {
            return None;
        }
        state
            .item_map
            .get(hash)
            .map(|r| Item::new(r.id.clone(), r.data.clone()))
    };

    if let Some(item) = cache.longest_prefix(hash).and_then(holds) {
        return Some(item);
    }
    let mut ancestor = geometry.parent_cache_key(original.cache_key());
    while let Some(key) = ancestor {
        if let Some(item) = cache.get(key).and_then(holds) {
            return Some(item);
        }
        ancestor = geometry.parent_cache_key(key);
    }
    None
}
