//! In-memory index of buckets by cache key.
//!
//! A 16-way radix tree over hex digits. Lookups cost one step per digit of
//! the key, independent of how many buckets exist.

use std::sync::Arc;

use crate::bucket::LockedBucket;

#[derive(Default)]
struct Node {
    entry: Option<Arc<LockedBucket>>,
    children: [Option<Box<Node>>; 16],
}

impl Node {
    fn is_empty(&self) -> bool {
        self.entry.is_none() && self.children.iter().all(Option::is_none)
    }

    fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Arc<LockedBucket>)) {
        if let Some(entry) = &self.entry {
            f(entry);
        }
        for child in self.children.iter().flatten() {
            child.walk(f);
        }
    }

    fn remove(&mut self, path: &[usize]) -> Option<Arc<LockedBucket>> {
        let Some((&first, rest)) = path.split_first() else {
            return self.entry.take();
        };
        let child = self.children[first].as_mut()?;
        let removed = child.remove(rest);
        if child.is_empty() {
            self.children[first] = None;
        }
        removed
    }
}

fn nibble(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'a'..=b'f' => Some((c - b'a' + 10) as usize),
        _ => None,
    }
}

fn path(cache_key: &str) -> Option<Vec<usize>> {
    cache_key.bytes().map(nibble).collect()
}

/// Prefix-searchable map from cache key to bucket.
///
/// Not synchronised; the packer wraps it in a `RwLock`.
#[derive(Default)]
pub struct BucketCache {
    root: Node,
    len: usize,
}

impl BucketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a bucket under its cache key, returning the entry it replaced.
    ///
    /// Keys that are not lowercase hex cannot be indexed and are handed back
    /// as `Err`.
    pub fn insert(
        &mut self,
        bucket: Arc<LockedBucket>,
    ) -> Result<Option<Arc<LockedBucket>>, Arc<LockedBucket>> {
        let Some(path) = path(bucket.cache_key()) else {
            return Err(bucket);
        };
        let mut node = &mut self.root;
        for digit in path {
            node = node.children[digit].get_or_insert_with(Box::default).as_mut();
        }
        let previous = node.entry.replace(bucket);
        if previous.is_none() {
            self.len += 1;
        }
        Ok(previous)
    }

    /// Remove the entry stored exactly at `cache_key`.
    pub fn delete(&mut self, cache_key: &str) -> Option<Arc<LockedBucket>> {
        let removed = self.root.remove(&path(cache_key)?);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// The entry stored exactly at `cache_key`.
    pub fn get(&self, cache_key: &str) -> Option<Arc<LockedBucket>> {
        let mut node = &self.root;
        for c in cache_key.bytes() {
            node = node.children[nibble(c)?].as_deref()?;
        }
        node.entry.clone()
    }

    /// The deepest entry whose cache key is a prefix of `key`.
    pub fn longest_prefix(&self, key: &str) -> Option<Arc<LockedBucket>> {
        let mut node = &self.root;
        let mut best = node.entry.as_ref();
        for c in key.bytes() {
            let Some(next) = nibble(c).and_then(|d| node.children[d].as_deref()) else {
                break;
            };
            node = next;
            if node.entry.is_some() {
                best = node.entry.as_ref();
            }
        }
        best.cloned()
    }

    /// Visit every entry in cache-key order.
    pub fn walk<'a>(&'a self, mut f: impl FnMut(&'a Arc<LockedBucket>)) {
        self.root.walk(&mut f);
    }

    /// All entries in cache-key order.
    pub fn entries(&self) -> Vec<Arc<LockedBucket>> {
        let mut out = Vec::with_capacity(self.len);
        self.walk(|lb| out.push(Arc::clone(lb)));
        out
    }
}

impl std::fmt::Debug for BucketCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketCache").field("len", &self.len).finish()
    }
}
