use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use packstore_codec::Bucket;
use packstore_types::{cache_key, HashKey, Item};

/// A bucket as held by the cache, paired with its lock stripe.
///
/// The stripe in the packer's [`LockTable`](crate::LockTable) serialises
/// writers of this bucket across storage calls. The inner `RwLock` only
/// makes the state readable from threads that do not hold the stripe and is
/// never held across I/O.
///
/// An entry is *retired* when invalidation or preload replaces it in the
/// cache. Anyone who found it through a stale lookup must look again.
pub struct LockedBucket {
    key: String,
    cache_key: String,
    lock_index: usize,
    state: RwLock<Bucket>,
    retired: AtomicBool,
}

impl LockedBucket {
    pub(crate) fn new(bucket: Bucket, cache_key: String, lock_index: usize) -> Self {
        Self {
            key: bucket.key.clone(),
            cache_key,
            lock_index,
            state: RwLock::new(bucket),
            retired: AtomicBool::new(false),
        }
    }

    /// Wrap a bucket that is not attached to any packer.
    ///
    /// The lock stripe is left unassigned; [`Packer::put_bucket`] derives
    /// the right one from the key.
    ///
    /// [`Packer::put_bucket`]: crate::Packer::put_bucket
    pub fn detached(bucket: Bucket) -> Self {
        let cache_key = cache_key(&bucket.key);
        Self::new(bucket, cache_key, 0)
    }

    /// Storage key, e.g. `"00/3"`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cache key, e.g. `"003"`.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn lock_index(&self) -> usize {
        self.lock_index
    }

    /// A copy of the current bucket state.
    pub fn snapshot(&self) -> Bucket {
        self.read().clone()
    }

    pub fn has_shards(&self) -> bool {
        self.read().has_shards
    }

    pub fn item_count(&self) -> usize {
        self.read().item_count()
    }

    /// Items held directly by this bucket.
    pub fn items(&self) -> Vec<Item> {
        let state = self.read();
        if state.has_shards {
            return Vec::new();
        }
        state
            .item_map
            .values()
            .map(|record| Item::new(record.id.clone(), record.data.clone()))
            .collect()
    }

    pub(crate) fn item(&self, hash: &HashKey) -> Option<Item> {
        self.read()
            .item(hash)
            .map(|record| Item::new(record.id.clone(), record.data.clone()))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Bucket> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Bucket> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for LockedBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("LockedBucket")
            .field("key", &self.key)
            .field("lock_index", &self.lock_index)
            .field("has_shards", &state.has_shards)
            .field("items", &state.item_map.len())
            .field("retired", &self.is_retired())
            .finish()
    }
}
