//! Directory-backed storage.
//!
//! Each key `a/b/c` is stored as the file `<root>/a/b/_c`. The `_` marker
//! lets a key and a folder of the same name coexist (`00` and `00/3`), which
//! the shard tree relies on.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::traits::{Storage, StorageEntry};

const FILE_MARKER: char = '_';

/// File-per-key storage rooted at a directory.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    max_value_size: Option<usize>,
}

impl FileStorage {
    /// Open (or create) storage rooted at `root`.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            max_value_size: None,
        })
    }

    /// Reject values longer than `max` bytes with `ValueTooLarge`.
    pub fn with_max_value_size(mut self, max: usize) -> Self {
        self.max_value_size = Some(max);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn split_key<'a>(&self, key: &'a str) -> StorageResult<(PathBuf, &'a str)> {
        let invalid = |reason: &str| StorageError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if key.is_empty() || key.ends_with('/') {
            return Err(invalid("empty final segment"));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(invalid("absolute or non-portable path"));
        }
        let (dir, name) = match key.rfind('/') {
            Some(idx) => (&key[..idx], &key[idx + 1..]),
            None => ("", key),
        };
        let mut path = self.root.clone();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(invalid("relative path segment"));
            }
            path.push(segment);
        }
        if name == "." || name == ".." {
            return Err(invalid("relative path segment"));
        }
        Ok((path, name))
    }

    fn file_path(&self, key: &str) -> StorageResult<PathBuf> {
        let (dir, name) = self.split_key(key)?;
        Ok(dir.join(format!("{FILE_MARKER}{name}")))
    }

    /// Remove empty directories between `dir` and the root.
    fn prune_empty_dirs(&self, mut dir: PathBuf) {
        while dir != self.root && dir.starts_with(&self.root) {
            if fs::remove_dir(&dir).is_err() {
                break;
            }
            if !dir.pop() {
                break;
            }
        }
    }
}

impl Storage for FileStorage {
    fn get(&self, ctx: &Context, key: &str) -> StorageResult<Option<StorageEntry>> {
        ctx.check()?;
        let path = self.file_path(key)?;
        match fs::read(&path) {
            Ok(value) => Ok(Some(StorageEntry::new(key, value))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, ctx: &Context, entry: &StorageEntry) -> StorageResult<()> {
        ctx.check()?;
        if let Some(max) = self.max_value_size {
            if entry.value.len() > max {
                return Err(StorageError::ValueTooLarge {
                    key: entry.key.clone(),
                    size: entry.value.len(),
                    max,
                });
            }
        }
        let (dir, name) = self.split_key(&entry.key)?;
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&entry.value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(format!("{FILE_MARKER}{name}")))
            .map_err(|e| StorageError::Io(e.error))?;
        debug!(key = %entry.key, len = entry.value.len(), "file storage put");
        Ok(())
    }

    fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        ctx.check()?;
        let path = self.file_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent.to_path_buf());
        }
        Ok(())
    }

    fn list(&self, ctx: &Context, prefix: &str) -> StorageResult<Vec<String>> {
        ctx.check()?;
        // Only folder prefixes ("" or ending in '/') are meaningful here.
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            let (dir, name) = self.split_key(prefix.trim_end_matches('/'))?;
            dir.join(name)
        };
        let read = match fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut children = Vec::new();
        for dirent in read {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if dirent.file_type()?.is_dir() {
                children.push(format!("{name}/"));
            } else if let Some(key) = name.strip_prefix(FILE_MARKER) {
                children.push(key.to_string());
            }
        }
        children.sort();
        Ok(children)
    }
}
