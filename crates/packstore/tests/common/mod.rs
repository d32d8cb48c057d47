#![allow(dead_code)]

use std::sync::Arc;

use rand::RngCore;

use packstore::{Packer, PackerConfig};
use packstore_storage::{Context, InMemoryStorage, Storage, StorageEntry, StorageError, StorageResult, StorageView};
use packstore_types::HashKey;

pub const BUCKET_PREFIX: &str = "packer/buckets/";
pub const CONFIG_PREFIX: &str = "packer/config/";

pub fn ctx() -> Context {
    Context::background()
}

pub fn open(backend: Arc<dyn Storage>, config: PackerConfig) -> Packer {
    Packer::open(
        &ctx(),
        StorageView::new(backend.clone(), BUCKET_PREFIX),
        StorageView::new(backend, CONFIG_PREFIX),
        config,
    )
    .unwrap()
}

pub fn memory_packer() -> (Arc<InMemoryStorage>, Packer) {
    let backend = Arc::new(InMemoryStorage::new());
    let packer = open(backend.clone(), PackerConfig::default());
    (backend, packer)
}

pub fn limited_packer(max: usize) -> (Arc<InMemoryStorage>, Packer) {
    let backend = Arc::new(InMemoryStorage::with_max_value_size(max));
    let packer = open(backend.clone(), PackerConfig::default());
    (backend, packer)
}

/// Random bytes, so compression cannot hide their size.
pub fn noise(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// `count` IDs whose hash keys start with `prefix`, tagged with `tag` so
/// separate calls can produce disjoint sets.
pub fn colliding_ids(count: usize, prefix: &str, tag: &str) -> Vec<String> {
    (0u64..)
        .map(|n| format!("{tag}-{n}"))
        .filter(|id| HashKey::of(id).as_str().starts_with(prefix))
        .take(count)
        .collect()
}

/// Fails every put whose key ends with `suffix`; everything else reaches
/// the wrapped storage.
pub struct FailingStorage {
    inner: Arc<dyn Storage>,
    suffix: String,
}

impl FailingStorage {
    pub fn new(inner: Arc<dyn Storage>, suffix: impl Into<String>) -> Self {
        Self {
            inner,
            suffix: suffix.into(),
        }
    }
}

impl Storage for FailingStorage {
    fn get(&self, ctx: &Context, key: &str) -> StorageResult<Option<StorageEntry>> {
        self.inner.get(ctx, key)
    }

    fn put(&self, ctx: &Context, entry: &StorageEntry) -> StorageResult<()> {
        if entry.key.ends_with(&self.suffix) {
            return Err(StorageError::Backend(format!("refusing to write {}", entry.key)));
        }
        self.inner.put(ctx, entry)
    }

    fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.inner.delete(ctx, key)
    }

    fn list(&self, ctx: &Context, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(ctx, prefix)
    }
}

/// Cancels the caller's context right after a put whose key ends with
/// `suffix` succeeds.
pub struct CancellingStorage {
    inner: Arc<dyn Storage>,
    suffix: String,
}

impl CancellingStorage {
    pub fn new(inner: Arc<dyn Storage>, suffix: impl Into<String>) -> Self {
        Self {
            inner,
            suffix: suffix.into(),
        }
    }
}

impl Storage for CancellingStorage {
    fn get(&self, ctx: &Context, key: &str) -> StorageResult<Option<StorageEntry>> {
        self.inner.get(ctx, key)
    }

    fn put(&self, ctx: &Context, entry: &StorageEntry) -> StorageResult<()> {
        self.inner.put(ctx, entry)?;
        if entry.key.ends_with(&self.suffix) {
            ctx.cancel();
        }
        Ok(())
    }

    fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.inner.delete(ctx, key)
    }

    fn list(&self, ctx: &Context, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(ctx, prefix)
    }
}
