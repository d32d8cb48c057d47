use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use packstore_codec::{Bucket, BucketCodec, ItemRecord};
use packstore_storage::{Context, Storage, StorageView};
use packstore_types::{cache_key, HashKey, Item, ShardGeometry};

use crate::bucket::LockedBucket;
use crate::cache::BucketCache;
use crate::config::PackerConfig;
use crate::error::{PackerError, PackerResult};
use crate::lock::LockTable;

/// Sub-folder of the bucket view that holds sharded (v2) buckets.
pub const BUCKET_VERSION_PREFIX: &str = "v2/";

/// Buckets waiting to be written, keyed by storage key.
pub(crate) type PendingWrites = DashMap<String, Arc<LockedBucket>>;

/// Where a mutated bucket goes once its in-memory state has changed.
#[derive(Clone, Copy)]
pub(crate) enum WriteMode<'a> {
    Immediate,
    Deferred(&'a PendingWrites),
}

/// Bucket-tree statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PackerStats {
    pub buckets: usize,
    pub leaf_buckets: usize,
    pub interior_buckets: usize,
    pub items: usize,
    pub max_depth: usize,
    pub pending_writes: usize,
}

/// A sharded packed-object store.
///
/// Items are routed by the BLAKE2b hash of their ID to the deepest bucket
/// whose key is a prefix of that hash. Buckets split when storage rejects
/// them as too large.
///
/// # Locking
///
/// - A bucket's lock stripe is held for the whole of a mutation, storage
///   calls included.
/// - The cache lock is taken last and only for short sections; nothing waits
///   on a stripe while holding it.
/// - Multi-stripe acquisition goes through [`LockTable::write_many`].
pub struct Packer {
    pub(crate) config: PackerConfig,
    pub(crate) codec: BucketCodec,
    pub(crate) bucket_view: StorageView,
    pub(crate) storage: StorageView,
    pub(crate) config_view: StorageView,
    pub(crate) geometry: OnceLock<ShardGeometry>,
    pub(crate) cache: RwLock<BucketCache>,
    pub(crate) locks: LockTable,
    pub(crate) queue_mode: AtomicBool,
    pub(crate) pending: PendingWrites,
    pub(crate) initialized: AtomicBool,
}

impl Packer {
    /// Build a packer without touching storage.
    ///
    /// Every operation fails with
    /// [`ErrorKind::NotInitialized`](crate::ErrorKind::NotInitialized) until
    /// [`Packer::preload_from_disk`] has run.
    pub fn new(
        bucket_view: StorageView,
        config_view: StorageView,
        config: PackerConfig,
    ) -> PackerResult<Self> {
        config.validate()?;
        Ok(Self {
            codec: BucketCodec::new(config.compression),
            storage: bucket_view.sub_view(BUCKET_VERSION_PREFIX),
            bucket_view,
            config_view,
            geometry: OnceLock::new(),
            cache: RwLock::new(BucketCache::new()),
            locks: LockTable::new(config.lock_table_size),
            queue_mode: AtomicBool::new(false),
            pending: DashMap::new(),
            initialized: AtomicBool::new(false),
            config,
        })
    }

    /// Build a packer and load its config and buckets from storage.
    pub fn open(
        ctx: &Context,
        bucket_view: StorageView,
        config_view: StorageView,
        config: PackerConfig,
    ) -> PackerResult<Self> {
        let packer = Self::new(bucket_view, config_view, config)?;
        packer.preload_from_disk(ctx)?;
        Ok(packer)
    }

    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    /// The effective geometry, once initialised.
    pub fn geometry(&self) -> Option<ShardGeometry> {
        self.geometry.get().copied()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The view holding v2 bucket entries (`<bucket prefix>v2/`).
    pub fn bucket_storage(&self) -> &StorageView {
        &self.storage
    }

    /// The bucket view the packer was built with, shared with legacy v1 data.
    pub fn bucket_view(&self) -> &StorageView {
        &self.bucket_view
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Store an item, replacing any item with the same ID.
    pub fn put_item(&self, ctx: &Context, item: Item) -> PackerResult<()> {
        self.put_items(ctx, vec![item])
    }

    /// Store several items with one storage write per touched bucket.
    ///
    /// The whole batch is validated first. On failure, items already written
    /// to other buckets stay written.
    pub fn put_items(&self, ctx: &Context, items: Vec<Item>) -> PackerResult<()> {
        self.put_items_with(ctx, items, self.write_mode())
    }

    pub fn get_item(&self, ctx: &Context, id: &str) -> PackerResult<Option<Item>> {
        const OP: &str = "get item";
        self.ready(ctx, OP)?;
        if id.is_empty() {
            return Err(PackerError::arg(OP, "missing ID"));
        }
        let hash = HashKey::of(id);
        let Some((lb, _guard)) = self.locate(hash.as_str(), LockTable::read) else {
            return Ok(None);
        };
        Ok(lb.item(&hash))
    }

    /// Look up several items; results are positional.
    pub fn get_items<S: AsRef<str>>(
        &self,
        ctx: &Context,
        ids: &[S],
    ) -> PackerResult<Vec<Option<Item>>> {
        ids.iter().map(|id| self.get_item(ctx, id.as_ref())).collect()
    }

    /// Delete an item. Deleting a missing item is not an error.
    pub fn delete_item(&self, ctx: &Context, id: &str) -> PackerResult<()> {
        self.delete_items(ctx, &[id])
    }

    pub fn delete_items<S: AsRef<str>>(&self, ctx: &Context, ids: &[S]) -> PackerResult<()> {
        self.delete_items_with(ctx, ids, self.write_mode())
    }

    /// Every item in every leaf bucket.
    ///
    /// Consistent with respect to the bucket tree, not to concurrent item
    /// writes.
    pub fn all_items(&self, ctx: &Context) -> PackerResult<Vec<Item>> {
        self.ready(ctx, "all items")?;
        let cache = self.cache_read();
        let mut items = Vec::new();
        cache.walk(|lb| items.extend(lb.items()));
        Ok(items)
    }

    /// Storage key of the bucket that holds (or would hold) `id`.
    pub fn bucket_key_for_item_id(&self, ctx: &Context, id: &str) -> PackerResult<String> {
        const OP: &str = "bucket key for item";
        let geometry = self.ready(ctx, OP)?;
        let hash = HashKey::of(id);
        if let Some(lb) = self.cache_read().longest_prefix(hash.as_str()) {
            return Ok(lb.key().to_string());
        }
        let root = geometry
            .root_key(hash.as_str())
            .map_err(PackerError::invalid_arg(OP))?;
        Ok(root.to_string())
    }

    /// Every cached bucket, ordered by cache key.
    pub fn buckets(&self, ctx: &Context) -> PackerResult<Vec<Arc<LockedBucket>>> {
        self.ready(ctx, "buckets")?;
        Ok(self.cache_read().entries())
    }

    pub fn stats(&self, ctx: &Context) -> PackerResult<PackerStats> {
        let geometry = self.ready(ctx, "stats")?;
        let cache = self.cache_read();
        let mut stats = PackerStats {
            pending_writes: self.pending.len(),
            ..PackerStats::default()
        };
        cache.walk(|lb| {
            stats.buckets += 1;
            if lb.has_shards() {
                stats.interior_buckets += 1;
            } else {
                stats.leaf_buckets += 1;
                stats.items += lb.item_count();
            }
            stats.max_depth = stats.max_depth.max(geometry.depth(lb.cache_key()));
        });
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// The bucket covering `key`, which may be a storage key, a cache key or
    /// any longer hex string such as a hash key.
    ///
    /// With `skip_cache` the bucket is re-read from storage and returned
    /// detached from the cache. The storage key read is the cache's best
    /// match, or the root key when nothing matches.
    pub fn get_bucket(
        &self,
        ctx: &Context,
        key: &str,
        skip_cache: bool,
    ) -> PackerResult<Option<Arc<LockedBucket>>> {
        const OP: &str = "get bucket";
        let geometry = self.ready(ctx, OP)?;
        let lookup = cache_key(key);
        if !lookup.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(PackerError::arg(OP, format!("{key:?} is not a hex key")));
        }
        let root = geometry
            .root_key(&lookup)
            .map_err(PackerError::invalid_arg(OP))?;
        let best = self.cache_read().longest_prefix(&lookup);
        if !skip_cache {
            return Ok(best);
        }

        let storage_key = match &best {
            Some(lb) => lb.key().to_string(),
            None => root.to_string(),
        };
        let Some(entry) = self
            .storage
            .get(ctx, &storage_key)
            .map_err(PackerError::storage(OP))?
        else {
            return Ok(None);
        };
        let bucket = self
            .codec
            .decode_at(&storage_key, &entry.value)
            .map_err(PackerError::codec(OP))?;
        Ok(Some(Arc::new(self.new_locked_bucket(bucket))))
    }

    /// Replace a bucket wholesale.
    ///
    /// The lock stripe is re-derived from the bucket key; whatever the
    /// caller's [`LockedBucket`] carries is ignored.
    pub fn put_bucket(&self, ctx: &Context, bucket: &LockedBucket) -> PackerResult<()> {
        const OP: &str = "put bucket";
        let geometry = self.ready(ctx, OP)?;
        let snapshot = bucket.snapshot();
        let cache_key = geometry
            .parse_bucket_key(&snapshot.key)
            .map_err(PackerError::invalid_arg(OP))?;
        let lock_index = self.locks.index_for(&cache_key);
        let _guard = self.locks.write(lock_index);

        let lb = Arc::new(LockedBucket::new(snapshot, cache_key, lock_index));
        self.persist_locked(ctx, &geometry, &lb, self.write_mode())?;
        let mut cache = self.cache_write();
        self.cache_insert(&mut cache, lb)
    }

    /// Empty a leaf bucket. The bucket stays in the cache.
    ///
    /// Interior buckets are refused.
    pub fn delete_bucket(&self, ctx: &Context, key: &str) -> PackerResult<()> {
        const OP: &str = "delete bucket";
        let geometry = self.ready(ctx, OP)?;
        let cache_key = geometry
            .parse_bucket_key(key)
            .map_err(PackerError::invalid_arg(OP))?;
        loop {
            let Some(lb) = self.cache_read().get(&cache_key) else {
                return Ok(());
            };
            let _guard = self.locks.write(lb.lock_index());
            let current = self.cache_read().get(&cache_key);
            if !current.is_some_and(|c| Arc::ptr_eq(&c, &lb)) {
                continue;
            }
            if lb.has_shards() {
                return Err(PackerError::arg(
                    OP,
                    format!("bucket {key} has shards and cannot be emptied"),
                ));
            }
            let saved = std::mem::take(&mut lb.write().item_map);
            if let Err(err) = self.persist_locked(ctx, &geometry, &lb, self.write_mode()) {
                lb.write().item_map = saved;
                return Err(err);
            }
            debug!(name = %self.config.name, key, removed = saved.len(), "emptied bucket");
            return Ok(());
        }
    }

    // -----------------------------------------------------------------------
    // Internals shared with the other modules
    // -----------------------------------------------------------------------

    pub(crate) fn cache_read(&self) -> RwLockReadGuard<'_, BucketCache> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn cache_write(&self) -> RwLockWriteGuard<'_, BucketCache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn initialized_geometry(&self, op: &'static str) -> PackerResult<ShardGeometry> {
        if !self.is_initialized() {
            return Err(PackerError::NotInitialized { op });
        }
        self.geometry().ok_or(PackerError::NotInitialized { op })
    }

    /// Initialised geometry, after checking the caller's context.
    pub(crate) fn ready(&self, ctx: &Context, op: &'static str) -> PackerResult<ShardGeometry> {
        let geometry = self.initialized_geometry(op)?;
        ctx.check().map_err(PackerError::storage(op))?;
        Ok(geometry)
    }

    pub(crate) fn new_locked_bucket(&self, bucket: Bucket) -> LockedBucket {
        let cache_key = cache_key(&bucket.key);
        let lock_index = self.locks.index_for(&cache_key);
        LockedBucket::new(bucket, cache_key, lock_index)
    }

    /// Insert into the cache, retiring whatever entry was replaced.
    pub(crate) fn cache_insert(
        &self,
        cache: &mut BucketCache,
        lb: Arc<LockedBucket>,
    ) -> PackerResult<()> {
        let inserted = Arc::clone(&lb);
        match cache.insert(lb) {
            Ok(Some(previous)) if !Arc::ptr_eq(&previous, &inserted) => previous.retire(),
            Ok(_) => {}
            Err(rejected) => {
                return Err(PackerError::internal(
                    "cache insert",
                    format!("bucket {} has a non-hex cache key", rejected.key()),
                ))
            }
        }
        Ok(())
    }

    /// Find the bucket covering `hash` and hold its stripe.
    ///
    /// The lookup is repeated after the stripe is taken; a bucket that was
    /// replaced or split in between is skipped and the search restarts.
    pub(crate) fn locate<'s, G>(
        &'s self,
        hash: &str,
        acquire: impl Fn(&'s LockTable, usize) -> G,
    ) -> Option<(Arc<LockedBucket>, G)> {
        loop {
            let found = self.cache_read().longest_prefix(hash)?;
            let guard = acquire(&self.locks, found.lock_index());
            let current = self.cache_read().longest_prefix(hash);
            if current.is_some_and(|c| Arc::ptr_eq(&c, &found)) {
                return Some((found, guard));
            }
        }
    }

    /// Find or create the leaf for `hash` and write-lock it.
    fn lock_leaf_for_write(
        &self,
        op: &'static str,
        geometry: &ShardGeometry,
        hash: &HashKey,
    ) -> PackerResult<(Arc<LockedBucket>, RwLockWriteGuard<'_, ()>)> {
        loop {
            if let Some((lb, guard)) = self.locate(hash.as_str(), LockTable::write) {
                if lb.has_shards() {
                    return Err(PackerError::internal(
                        op,
                        format!(
                            "bucket {} is sharded but no child covers {}",
                            lb.key(),
                            hash.short_hex()
                        ),
                    ));
                }
                return Ok((lb, guard));
            }
            if let Some(created) = self.create_and_lock_root(op, geometry, hash)? {
                return Ok(created);
            }
        }
    }

    /// Create the empty root bucket for `hash`, unless another writer beat
    /// us to it (`None`).
    fn create_and_lock_root(
        &self,
        op: &'static str,
        geometry: &ShardGeometry,
        hash: &HashKey,
    ) -> PackerResult<Option<(Arc<LockedBucket>, RwLockWriteGuard<'_, ()>)>> {
        let root = geometry
            .root_key(hash.as_str())
            .map_err(PackerError::invalid_arg(op))?;
        let lock_index = self.locks.index_for(root);
        let guard = self.locks.write(lock_index);
        let mut cache = self.cache_write();
        if cache.longest_prefix(hash.as_str()).is_some() {
            return Ok(None);
        }
        let lb = Arc::new(LockedBucket::new(
            Bucket::leaf(root),
            root.to_string(),
            lock_index,
        ));
        self.cache_insert(&mut cache, Arc::clone(&lb))?;
        drop(cache);
        debug!(name = %self.config.name, key = root, "created root bucket");
        Ok(Some((lb, guard)))
    }

    pub(crate) fn put_items_with(
        &self,
        ctx: &Context,
        items: Vec<Item>,
        mode: WriteMode<'_>,
    ) -> PackerResult<()> {
        const OP: &str = "put item";
        let geometry = self.ready(ctx, OP)?;
        let mut remaining = validate_items(OP, items)?;

        while let Some(hash) = remaining.first().map(|(hash, _)| hash.clone()) {
            ctx.check().map_err(PackerError::storage(OP))?;
            let (lb, _guard) = self.lock_leaf_for_write(OP, &geometry, &hash)?;
            let (batch, rest): (Vec<_>, Vec<_>) = {
                let cache = self.cache_read();
                remaining.into_iter().partition(|(hash, _)| {
                    cache
                        .longest_prefix(hash.as_str())
                        .is_some_and(|c| Arc::ptr_eq(&c, &lb))
                })
            };
            remaining = rest;

            let mut undo: Vec<(String, Option<ItemRecord>)> = Vec::with_capacity(batch.len());
            {
                let mut state = lb.write();
                for (hash, item) in batch {
                    let key = hash.into_string();
                    let previous = state.item_map.insert(key.clone(), item.into());
                    undo.push((key, previous));
                }
            }
            if let Err(err) = self.persist_locked(ctx, &geometry, &lb, mode) {
                let mut state = lb.write();
                for (key, previous) in undo.into_iter().rev() {
                    match previous {
                        Some(record) => state.item_map.insert(key, record),
                        None => state.item_map.remove(&key),
                    };
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn delete_items_with<S: AsRef<str>>(
        &self,
        ctx: &Context,
        ids: &[S],
        mode: WriteMode<'_>,
    ) -> PackerResult<()> {
        const OP: &str = "delete item";
        let geometry = self.ready(ctx, OP)?;
        let mut remaining: Vec<HashKey> = Vec::with_capacity(ids.len());
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref();
            if id.is_empty() {
                return Err(PackerError::arg(OP, "missing ID"));
            }
            if seen.insert(id) {
                remaining.push(HashKey::of(id));
            }
        }

        while let Some(hash) = remaining.first().cloned() {
            ctx.check().map_err(PackerError::storage(OP))?;
            let Some((lb, _guard)) = self.locate(hash.as_str(), LockTable::write) else {
                // No bucket covers it, so nothing to delete.
                remaining.remove(0);
                continue;
            };
            let (batch, rest): (Vec<_>, Vec<_>) = {
                let cache = self.cache_read();
                remaining.into_iter().partition(|hash| {
                    cache
                        .longest_prefix(hash.as_str())
                        .is_some_and(|c| Arc::ptr_eq(&c, &lb))
                })
            };
            remaining = rest;
            if lb.has_shards() {
                continue;
            }

            let removed: Vec<(String, ItemRecord)> = {
                let mut state = lb.write();
                batch
                    .into_iter()
                    .filter_map(|hash| {
                        let key = hash.into_string();
                        state.item_map.remove(&key).map(|record| (key, record))
                    })
                    .collect()
            };
            if removed.is_empty() {
                continue;
            }
            if let Err(err) = self.persist_locked(ctx, &geometry, &lb, mode) {
                let mut state = lb.write();
                state.item_map.extend(removed);
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Reject items with no ID and IDs repeated within one batch.
fn validate_items(op: &'static str, items: Vec<Item>) -> PackerResult<Vec<(HashKey, Item)>> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .map(|item| {
            item.validate().map_err(PackerError::invalid_arg(op))?;
            if !seen.insert(item.id.clone()) {
                return Err(PackerError::arg(op, format!("duplicate ID {:?}", item.id)));
            }
            Ok((item.hash_key(), item))
        })
        .collect()
}

impl std::fmt::Debug for Packer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packer")
            .field("name", &self.config.name)
            .field("storage", &self.storage)
            .field("geometry", &self.geometry.get())
            .field("initialized", &self.is_initialized())
            .field("queue_mode", &self.queue_mode.load(Ordering::Relaxed))
            .finish()
    }
}
