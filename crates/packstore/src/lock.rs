//! Striped bucket locks.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A fixed vector of reader/writer locks shared by all buckets.
///
/// A bucket maps to the stripe `crc32(cache_key) % len`. The table never
/// changes size after construction. Guards protect no data of their own
/// (`()`), so a poisoned stripe is still usable.
pub struct LockTable {
    stripes: Vec<RwLock<()>>,
}

impl LockTable {
    /// A table with `size` stripes (at least one).
    pub fn new(size: usize) -> Self {
        Self {
            stripes: (0..size.max(1)).map(|_| RwLock::new(())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Stripe index for a cache key.
    pub fn index_for(&self, cache_key: &str) -> usize {
        crc32fast::hash(cache_key.as_bytes()) as usize % self.stripes.len()
    }

    pub fn read(&self, index: usize) -> RwLockReadGuard<'_, ()> {
        self.stripes[index % self.stripes.len()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self, index: usize) -> RwLockWriteGuard<'_, ()> {
        self.stripes[index % self.stripes.len()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Write-lock several stripes in table order, taking each stripe once.
    pub fn write_many(
        &self,
        indices: impl IntoIterator<Item = usize>,
    ) -> Vec<RwLockWriteGuard<'_, ()>> {
        let mut indices: Vec<usize> = indices
            .into_iter()
            .map(|i| i % self.stripes.len())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| self.write(i)).collect()
    }
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}
