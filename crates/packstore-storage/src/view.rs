use std::sync::Arc;

use crate::context::Context;
use crate::error::StorageResult;
use crate::traits::{Storage, StorageEntry};

/// A prefix-scoped view over another [`Storage`].
///
/// Every key passed to the view is prepended with its prefix before reaching
/// the underlying storage; listed keys come back relative to the view. Views
/// nest: [`StorageView::sub_view`] composes prefixes over the same backend, so
/// [`StorageView::prefix`] is always the full path from the backend root.
#[derive(Clone)]
pub struct StorageView {
    inner: Arc<dyn Storage>,
    prefix: String,
}

impl StorageView {
    pub fn new(inner: Arc<dyn Storage>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// A view nested under this one.
    pub fn sub_view(&self, prefix: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            prefix: format!("{}{prefix}", self.prefix),
        }
    }

    /// Full prefix from the backend root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The backend this view writes to.
    pub fn backend(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    /// Map a view-relative key to a backend key.
    pub fn expand_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Map a backend key to a view-relative key, or `None` if it lies
    /// outside the view.
    pub fn truncate_key<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        full_key.strip_prefix(self.prefix.as_str())
    }
}

impl Storage for StorageView {
    fn get(&self, ctx: &Context, key: &str) -> StorageResult<Option<StorageEntry>> {
        let entry = self.inner.get(ctx, &self.expand_key(key))?;
        Ok(entry.map(|e| StorageEntry::new(key, e.value)))
    }

    fn put(&self, ctx: &Context, entry: &StorageEntry) -> StorageResult<()> {
        let expanded = StorageEntry {
            key: self.expand_key(&entry.key),
            value: entry.value.clone(),
        };
        self.inner.put(ctx, &expanded)
    }

    fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.inner.delete(ctx, &self.expand_key(key))
    }

    fn list(&self, ctx: &Context, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(ctx, &self.expand_key(prefix))
    }
}

impl std::fmt::Debug for StorageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageView")
            .field("prefix", &self.prefix)
            .finish()
    }
}
