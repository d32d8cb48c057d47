//! Writing buckets and splitting them when storage refuses their size.
//!
//! A split moves a leaf through these on-disk states:
//!
//! 1. every child written, parent still a leaf (a crash here is rolled back
//!    by preload, which treats the children as orphans)
//! 2. parent rewritten as an interior bucket with no items
//! 3. children published in the cache, parent flipped in memory
//!
//! Children stay private to the splitting thread until step 3, so they need
//! no locks of their own.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use packstore_codec::Bucket;
use packstore_storage::{Context, Storage, StorageEntry, StorageError};
use packstore_types::{cache_key, ShardGeometry};

use crate::bucket::LockedBucket;
use crate::error::{MultiError, PackerError, PackerResult};
use crate::packer::{Packer, WriteMode};

/// How many times a bucket holding at most one item may be split along one
/// chain before its overflow is returned to the caller.
pub const MAX_LONE_ITEM_SPLITS: usize = 2;

/// Budget for removing what an aborted split wrote. Cleanup runs on its own
/// context so a cancelled caller cannot leave orphans behind.
const SPLIT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

impl Packer {
    pub(crate) fn write_mode(&self) -> WriteMode<'_> {
        if self.queue_mode.load(Ordering::Acquire) {
            WriteMode::Deferred(&self.pending)
        } else {
            WriteMode::Immediate
        }
    }

    /// Persist or queue a bucket whose stripe the caller holds for writing.
    pub(crate) fn persist_locked(
        &self,
        ctx: &Context,
        geometry: &ShardGeometry,
        lb: &Arc<LockedBucket>,
        mode: WriteMode<'_>,
    ) -> PackerResult<()> {
        match mode {
            WriteMode::Deferred(pending) => {
                pending.insert(lb.key().to_string(), Arc::clone(lb));
                Ok(())
            }
            WriteMode::Immediate => self.store_bucket(ctx, geometry, lb),
        }
    }

    /// Write a cached bucket, splitting it if it is too large.
    ///
    /// The caller holds the bucket's stripe for writing. On success after a
    /// split the bucket becomes interior in memory and its descendants are
    /// published in one cache update. On failure memory is untouched.
    pub(crate) fn store_bucket(
        &self,
        ctx: &Context,
        geometry: &ShardGeometry,
        lb: &Arc<LockedBucket>,
    ) -> PackerResult<()> {
        let mut bucket = lb.snapshot();
        let published = self.persist(ctx, geometry, &mut bucket, 0)?;
        if published.is_empty() {
            return Ok(());
        }

        let mut cache = self.cache_write();
        *lb.write() = bucket;
        for descendant in published {
            let descendant = Arc::new(self.new_locked_bucket(descendant));
            self.cache_insert(&mut cache, descendant)?;
        }
        Ok(())
    }

    /// Write `bucket`, splitting on overflow. Returns the descendants the
    /// split created (empty when no split was needed).
    fn persist(
        &self,
        ctx: &Context,
        geometry: &ShardGeometry,
        bucket: &mut Bucket,
        lone_splits: usize,
    ) -> PackerResult<Vec<Bucket>> {
        const OP: &str = "store bucket";
        let value = self.codec.encode(bucket).map_err(PackerError::codec(OP))?;
        match self
            .storage
            .put(ctx, &StorageEntry::new(bucket.key.clone(), value))
        {
            Ok(()) => Ok(Vec::new()),
            Err(e) if e.is_value_too_large() => {
                self.split(ctx, geometry, bucket, e, lone_splits)
            }
            Err(e) => Err(PackerError::Storage { op: OP, source: e }),
        }
    }

    fn split(
        &self,
        ctx: &Context,
        geometry: &ShardGeometry,
        parent: &mut Bucket,
        overflow: StorageError,
        lone_splits: usize,
    ) -> PackerResult<Vec<Bucket>> {
        const OP: &str = "split bucket";
        let parent_cache_key = cache_key(&parent.key);
        let lone = parent.item_map.len() <= 1;
        if parent.has_shards
            || !geometry.can_split(&parent_cache_key)
            || (lone && lone_splits >= MAX_LONE_ITEM_SPLITS)
        {
            return Err(PackerError::Storage {
                op: OP,
                source: overflow,
            });
        }
        let child_lone_splits = if lone { lone_splits + 1 } else { lone_splits };

        debug!(
            name = %self.config.name,
            key = %parent.key,
            items = parent.item_map.len(),
            "splitting bucket"
        );

        let mut children: Vec<Bucket> = geometry
            .child_keys(&parent.key)
            .into_iter()
            .map(Bucket::leaf)
            .collect();
        for (hash, record) in &parent.item_map {
            let child = geometry
                .child_index(&parent_cache_key, hash)
                .ok()
                .and_then(|index| children.get_mut(index))
                .ok_or_else(|| {
                    PackerError::internal(
                        OP,
                        format!("item {hash} has no child under bucket {}", parent.key),
                    )
                })?;
            child.item_map.insert(hash.clone(), record.clone());
        }

        // Keys written so far, children and their descendants alike.
        let mut written: Vec<String> = Vec::new();
        let mut published: Vec<Bucket> = Vec::with_capacity(children.len());
        for mut child in children {
            match self.persist(ctx, geometry, &mut child, child_lone_splits) {
                Ok(descendants) => {
                    written.push(child.key.clone());
                    written.extend(descendants.iter().map(|d| d.key.clone()));
                    published.push(child);
                    published.extend(descendants);
                }
                Err(err) => return Err(self.abort_split(&parent.key, err, &written)),
            }
        }

        let items = std::mem::take(&mut parent.item_map);
        parent.has_shards = true;
        let flipped = self
            .codec
            .encode(parent)
            .map_err(PackerError::codec(OP))
            .and_then(|value| {
                self.storage
                    .put(ctx, &StorageEntry::new(parent.key.clone(), value))
                    .map_err(PackerError::storage(OP))
            });
        if let Err(err) = flipped {
            parent.has_shards = false;
            parent.item_map = items;
            return Err(self.abort_split(&parent.key, err, &written));
        }

        debug!(
            name = %self.config.name,
            key = %parent.key,
            written = written.len(),
            "split committed"
        );
        Ok(published)
    }

    /// Remove everything an aborted split wrote. Cleanup failures are
    /// collected behind the error that aborted the split.
    fn abort_split(&self, parent_key: &str, cause: PackerError, written: &[String]) -> PackerError {
        let ctx = Context::background().with_timeout(SPLIT_CLEANUP_TIMEOUT);
        let mut cleanup = Vec::new();
        for key in written.iter().rev() {
            if let Err(e) = self.storage.delete(&ctx, key) {
                warn!(
                    name = %self.config.name,
                    key = %key,
                    error = %e,
                    "failed to remove bucket written by aborted split"
                );
                cleanup.push(PackerError::Storage {
                    op: "split cleanup",
                    source: e,
                });
            }
        }
        debug!(
            name = %self.config.name,
            key = parent_key,
            removed = written.len() - cleanup.len(),
            "split aborted"
        );
        if cleanup.is_empty() {
            return cause;
        }
        let mut errors = MultiError::new();
        errors.push(cause);
        for err in cleanup {
            errors.push(err);
        }
        PackerError::Multiple(errors)
    }
}
