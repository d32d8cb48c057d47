use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use packstore_storage::{collect_keys, Context, Storage};
use packstore_types::ShardGeometry;

use crate::bucket::LockedBucket;
use crate::cache::BucketCache;
use crate::config;
use crate::error::{PackerError, PackerResult};
use crate::packer::Packer;

impl Packer {
    /// Load the persisted config and every bucket, then mark the packer
    /// initialised.
    ///
    /// Keys are visited in sorted order, so a parent is always seen before
    /// its children. A key nested under the most recent leaf that still has
    /// items is left over from a split that crashed before the parent was
    /// rewritten; it is deleted and skipped.
    pub fn preload_from_disk(&self, ctx: &Context) -> PackerResult<()> {
        const OP: &str = "preload";
        ctx.check().map_err(PackerError::storage(OP))?;

        let persisted = config::load_or_store(ctx, &self.config_view, &self.config)?;
        let loaded = ShardGeometry::new(persisted.base_bucket_bits, self.config.bucket_shard_bits)
            .map_err(PackerError::invalid_arg(OP))?;
        let geometry = *self.geometry.get_or_init(|| loaded);
        if geometry != loaded {
            return Err(PackerError::arg(
                OP,
                "persisted base bucket bits changed while the packer was running",
            ));
        }

        let keys = collect_keys(&self.storage, ctx).map_err(PackerError::storage(OP))?;
        let mut cache = BucketCache::new();
        let mut last_non_empty: Option<String> = None;
        let mut orphans = 0usize;
        for key in keys {
            let shadowed = last_non_empty
                .as_deref()
                .and_then(|parent| key.strip_prefix(parent))
                .is_some_and(|rest| rest.starts_with('/'));
            if shadowed {
                match self.storage.delete(ctx, &key) {
                    Ok(()) => {
                        orphans += 1;
                        debug!(name = %self.config.name, key = %key, "removed orphaned bucket");
                    }
                    Err(e) => warn!(
                        name = %self.config.name,
                        key = %key,
                        error = %e,
                        "failed to remove orphaned bucket"
                    ),
                }
                continue;
            }

            let cache_key = match geometry.parse_bucket_key(&key) {
                Ok(cache_key) => cache_key,
                Err(e) => {
                    warn!(name = %self.config.name, key = %key, error = %e, "ignoring unrecognised entry");
                    continue;
                }
            };
            let Some(entry) = self.storage.get(ctx, &key).map_err(PackerError::storage(OP))? else {
                continue;
            };
            let bucket = self
                .codec
                .decode_at(&key, &entry.value)
                .map_err(PackerError::codec(OP))?;
            if bucket.is_leaf() && !bucket.item_map.is_empty() {
                last_non_empty = Some(key.clone());
            }
            let lock_index = self.locks.index_for(&cache_key);
            self.cache_insert(
                &mut cache,
                Arc::new(LockedBucket::new(bucket, cache_key, lock_index)),
            )?;
        }

        let buckets = cache.len();
        let previous = std::mem::replace(&mut *self.cache_write(), cache);
        previous.walk(|lb| lb.retire());
        self.initialized.store(true, Ordering::Release);
        info!(
            name = %self.config.name,
            buckets,
            orphans,
            base_bucket_bits = geometry.base_bucket_bits(),
            "preloaded buckets"
        );
        Ok(())
    }
}
