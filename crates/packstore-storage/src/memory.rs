use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::traits::{Storage, StorageEntry};

/// In-memory, `BTreeMap`-based storage.
///
/// Intended for tests and embedding. An optional per-entry size limit makes
/// it behave like a real backend for sharding tests, and the `set_fail_*`
/// switches inject backend failures.
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    max_value_size: Option<usize>,
    fail_get: AtomicBool,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
    fail_list: AtomicBool,
}

impl InMemoryStorage {
    /// Create a new empty store with no size limit.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            max_value_size: None,
            fail_get: AtomicBool::new(false),
            fail_put: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
        }
    }

    /// Create a store that rejects values longer than `max` bytes.
    pub fn with_max_value_size(max: usize) -> Self {
        Self {
            max_value_size: Some(max),
            ..Self::new()
        }
    }

    pub fn max_value_size(&self) -> Option<usize> {
        self.max_value_size
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn injected(flag: &AtomicBool, op: &str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!("injected {op} failure")));
        }
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, ctx: &Context, key: &str) -> StorageResult<Option<StorageEntry>> {
        ctx.check()?;
        Self::injected(&self.fail_get, "get")?;
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map
            .get(key)
            .map(|value| StorageEntry::new(key, value.clone())))
    }

    fn put(&self, ctx: &Context, entry: &StorageEntry) -> StorageResult<()> {
        ctx.check()?;
        Self::injected(&self.fail_put, "put")?;
        if let Some(max) = self.max_value_size {
            if entry.value.len() > max {
                return Err(StorageError::ValueTooLarge {
                    key: entry.key.clone(),
                    size: entry.value.len(),
                    max,
                });
            }
        }
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(entry.key.clone(), entry.value.clone());
        Ok(())
    }

    fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        ctx.check()?;
        Self::injected(&self.fail_delete, "delete")?;
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
        Ok(())
    }

    fn list(&self, ctx: &Context, prefix: &str) -> StorageResult<Vec<String>> {
        ctx.check()?;
        Self::injected(&self.fail_list, "list")?;
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut children: Vec<String> = Vec::new();
        let range = map.range::<str, _>((Bound::Included(prefix), Bound::Unbounded));
        for (key, _) in range {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            let child = match rest.find('/') {
                Some(idx) => &rest[..=idx],
                None => rest,
            };
            if children.last().map(String::as_str) != Some(child) {
                children.push(child.to_string());
            }
        }
        children.sort();
        children.dedup();
        Ok(children)
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("entry_count", &self.len())
            .field("max_value_size", &self.max_value_size)
            .finish()
    }
}
