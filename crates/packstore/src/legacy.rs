//! Reading v1 buckets and moving their items into the sharded layout.
//!
//! v1 kept 256 flat buckets directly under the bucket prefix, keyed by the
//! first hex byte of the item hash, each holding its items as a list.

use serde::Serialize;
use tracing::{debug, info};

use packstore_codec::{legacy_items, BucketCodec, CompressionKind};
use packstore_storage::{Context, Storage, StorageView};
use packstore_types::Item;

use crate::error::{PackerError, PackerResult};
use crate::packer::Packer;

/// Read access to v1 buckets under a bucket prefix.
#[derive(Debug, Clone)]
pub struct LegacyReader {
    view: StorageView,
    codec: BucketCodec,
}

impl LegacyReader {
    /// A reader over the same bucket view the v2 packer was built with.
    pub fn new(bucket_view: StorageView) -> Self {
        Self {
            view: bucket_view,
            codec: BucketCodec::new(CompressionKind::default()),
        }
    }

    /// Keys of the v1 buckets present, sorted.
    pub fn bucket_keys(&self, ctx: &Context) -> PackerResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .view
            .list(ctx, "")
            .map_err(PackerError::storage("list legacy buckets"))?
            .into_iter()
            .filter(|key| is_legacy_key(key))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Items in one v1 bucket. A missing bucket has none.
    pub fn read_bucket(&self, ctx: &Context, key: &str) -> PackerResult<Vec<Item>> {
        const OP: &str = "read legacy bucket";
        if !is_legacy_key(key) {
            return Err(PackerError::arg(OP, format!("{key:?} is not a v1 bucket key")));
        }
        let Some(entry) = self.view.get(ctx, key).map_err(PackerError::storage(OP))? else {
            return Ok(Vec::new());
        };
        let bucket = self
            .codec
            .decode(&entry.value)
            .map_err(PackerError::codec(OP))?;
        Ok(legacy_items(bucket))
    }

    /// Every item in every v1 bucket.
    pub fn items(&self, ctx: &Context) -> PackerResult<Vec<Item>> {
        let mut items = Vec::new();
        for key in self.bucket_keys(ctx)? {
            items.extend(self.read_bucket(ctx, &key)?);
        }
        Ok(items)
    }

    pub fn delete_bucket(&self, ctx: &Context, key: &str) -> PackerResult<()> {
        const OP: &str = "delete legacy bucket";
        if !is_legacy_key(key) {
            return Err(PackerError::arg(OP, format!("{key:?} is not a v1 bucket key")));
        }
        self.view.delete(ctx, key).map_err(PackerError::storage(OP))
    }
}

fn is_legacy_key(key: &str) -> bool {
    key.len() == 2 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeOptions {
    /// Delete each v1 bucket once its items are durable in v2.
    pub discard_legacy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    pub legacy_buckets: usize,
    pub items_copied: usize,
    pub legacy_deleted: usize,
}

impl Packer {
    /// Copy every v1 item into this packer.
    ///
    /// Items are batched in memory and flushed once. v1 buckets are only
    /// deleted after the flush succeeded. Items already present in v2 are
    /// overwritten by their v1 copy; v1 writes that race the upgrade are not
    /// picked up.
    pub fn upgrade_from_legacy(
        &self,
        ctx: &Context,
        legacy: &LegacyReader,
        options: UpgradeOptions,
    ) -> PackerResult<UpgradeReport> {
        self.ready(ctx, "upgrade from legacy")?;
        let keys = legacy.bucket_keys(ctx)?;
        let mut report = UpgradeReport {
            legacy_buckets: keys.len(),
            ..UpgradeReport::default()
        };

        let batch = self.batch_writer();
        for key in &keys {
            let items = legacy.read_bucket(ctx, key)?;
            if items.is_empty() {
                continue;
            }
            report.items_copied += items.len();
            debug!(name = %self.config.name, key = %key, items = items.len(), "copying v1 bucket");
            batch.put_items(ctx, items)?;
        }
        batch.flush(ctx)?;

        if options.discard_legacy {
            for key in &keys {
                legacy.delete_bucket(ctx, key)?;
                report.legacy_deleted += 1;
            }
        }
        info!(
            name = %self.config.name,
            buckets = report.legacy_buckets,
            items = report.items_copied,
            deleted = report.legacy_deleted,
            "upgraded v1 buckets"
        );
        Ok(report)
    }
}
