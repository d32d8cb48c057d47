use crate::context::Context;
use crate::error::StorageResult;

/// A single key-value entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl StorageEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Key-value storage the packer sits on.
///
/// All implementations must satisfy these invariants:
/// - Each entry is its own atomic unit; a `put` either fully replaces the
///   value or leaves the old one in place.
/// - `put` returns [`StorageError::ValueTooLarge`] (and writes nothing) when
///   the value exceeds the backend's per-entry limit. The packer relies on
///   this sentinel to decide when to shard.
/// - Implementations must not call back into the packer: the packer holds
///   bucket locks across storage calls.
/// - Every call checks its [`Context`] before doing any work.
///
/// Keys are `/`-separated paths. `list` has one-level semantics: it returns
/// the immediate children of `prefix`, relative to it, with sub-folders
/// reported once with a trailing `/`.
///
/// [`StorageError::ValueTooLarge`]: crate::StorageError::ValueTooLarge
pub trait Storage: Send + Sync {
    /// Read an entry. Returns `Ok(None)` if the key does not exist.
    fn get(&self, ctx: &Context, key: &str) -> StorageResult<Option<StorageEntry>>;

    /// Create or replace an entry.
    fn put(&self, ctx: &Context, entry: &StorageEntry) -> StorageResult<()>;

    /// Delete an entry. Deleting a missing key is not an error.
    fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()>;

    /// List the immediate children of `prefix`, sorted.
    fn list(&self, ctx: &Context, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Recursively list every key under the storage root, sorted.
pub fn collect_keys(storage: &dyn Storage, ctx: &Context) -> StorageResult<Vec<String>> {
    collect_keys_with_prefix(storage, ctx, "")
}

/// Recursively list every key under `prefix` (keys are returned in full,
/// including the prefix), sorted.
pub fn collect_keys_with_prefix(
    storage: &dyn Storage,
    ctx: &Context,
    prefix: &str,
) -> StorageResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut pending = vec![prefix.to_string()];
    while let Some(folder) = pending.pop() {
        for child in storage.list(ctx, &folder)? {
            let full = format!("{folder}{child}");
            if child.ends_with('/') {
                pending.push(full);
            } else {
                keys.push(full);
            }
        }
    }
    keys.sort();
    Ok(keys)
}
