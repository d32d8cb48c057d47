//! Deferred writes.
//!
//! While writes are deferred, mutations are applied to the cached buckets
//! immediately but storage is only touched on flush. Later writes to the
//! same bucket replace earlier pending ones.

use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::{debug, warn};

use packstore_storage::Context;
use packstore_types::{Item, ShardGeometry};

use crate::error::{MultiError, PackerResult};
use crate::packer::{Packer, PendingWrites, WriteMode};

impl Packer {
    /// Defer (or stop deferring) storage writes for every caller of this
    /// packer. Turning it off does not flush.
    pub fn set_queue_mode(&self, enabled: bool) {
        self.queue_mode.store(enabled, Ordering::Release);
        debug!(name = %self.config.name, enabled, "queue mode");
    }

    pub fn queue_mode(&self) -> bool {
        self.queue_mode.load(Ordering::Acquire)
    }

    /// Buckets waiting in the packer-wide queue.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Write every queued bucket. Failed buckets stay queued; their errors
    /// are collected.
    pub fn flush_queue(&self, ctx: &Context) -> PackerResult<()> {
        let geometry = self.ready(ctx, "flush queue")?;
        self.flush_pending(ctx, &geometry, &self.pending)
    }

    /// A handle with its own pending-write map, independent of queue mode.
    pub fn batch_writer(&self) -> BatchWriter<'_> {
        BatchWriter {
            packer: self,
            pending: DashMap::new(),
        }
    }

    pub(crate) fn flush_pending(
        &self,
        ctx: &Context,
        geometry: &ShardGeometry,
        pending: &PendingWrites,
    ) -> PackerResult<()> {
        let keys: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
        let mut errors = MultiError::new();
        let mut flushed = 0usize;
        for key in keys {
            let Some((_, lb)) = pending.remove(&key) else {
                continue;
            };
            let _guard = self.locks.write(lb.lock_index());
            if lb.is_retired() {
                // Replaced by invalidation or preload; the replacement wins.
                continue;
            }
            match self.store_bucket(ctx, geometry, &lb) {
                Ok(()) => flushed += 1,
                Err(err) => {
                    warn!(name = %self.config.name, key = %key, error = %err, "failed to flush bucket");
                    pending.entry(key).or_insert(lb);
                    errors.push(err);
                }
            }
        }
        debug!(name = %self.config.name, flushed, failed = errors.len(), "flushed pending writes");
        errors.into_result()
    }
}

/// Batches item writes in memory until [`BatchWriter::flush`].
///
/// Changes are visible to readers of the packer at once. Dropping the
/// writer without flushing leaves them in memory only.
pub struct BatchWriter<'a> {
    packer: &'a Packer,
    pending: PendingWrites,
}

impl BatchWriter<'_> {
    pub fn put_item(&self, ctx: &Context, item: Item) -> PackerResult<()> {
        self.put_items(ctx, vec![item])
    }

    pub fn put_items(&self, ctx: &Context, items: Vec<Item>) -> PackerResult<()> {
        self.packer
            .put_items_with(ctx, items, WriteMode::Deferred(&self.pending))
    }

    pub fn delete_item(&self, ctx: &Context, id: &str) -> PackerResult<()> {
        self.delete_items(ctx, &[id])
    }

    pub fn delete_items<S: AsRef<str>>(&self, ctx: &Context, ids: &[S]) -> PackerResult<()> {
        self.packer
            .delete_items_with(ctx, ids, WriteMode::Deferred(&self.pending))
    }

    /// Buckets modified since the last flush.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    pub fn flush(&self, ctx: &Context) -> PackerResult<()> {
        let geometry = self.packer.ready(ctx, "flush batch")?;
        self.packer.flush_pending(ctx, &geometry, &self.pending)
    }
}

impl Drop for BatchWriter<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                name = %self.packer.config.name,
                pending = self.pending.len(),
                "batch writer dropped with unflushed buckets"
            );
        }
    }
}
