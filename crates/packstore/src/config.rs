use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use packstore_codec::CompressionKind;
use packstore_storage::{Context, Storage, StorageEntry, StorageView};
use packstore_types::ShardGeometry;

use crate::error::{PackerError, PackerResult};

/// Key of the persisted config entry inside the config view.
pub const CONFIG_KEY: &str = "config";

/// Configuration for a [`Packer`](crate::Packer).
///
/// `base_bucket_bits` only applies the first time a packer starts on empty
/// storage. After that the persisted value wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackerConfig {
    /// Width of root bucket keys in bits (`2^bits` roots).
    pub base_bucket_bits: u32,
    /// Bits added per split (`2^bits` children).
    pub bucket_shard_bits: u32,
    /// Number of striped bucket locks.
    pub lock_table_size: usize,
    /// Compression applied to written buckets.
    pub compression: CompressionKind,
    /// Attached to every log event of this packer.
    pub name: String,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            base_bucket_bits: 8,
            bucket_shard_bits: 4,
            lock_table_size: 256,
            compression: CompressionKind::Snappy,
            name: "packer".to_string(),
        }
    }
}

impl PackerConfig {
    pub fn with_base_bucket_bits(mut self, bits: u32) -> Self {
        self.base_bucket_bits = bits;
        self
    }

    pub fn with_bucket_shard_bits(mut self, bits: u32) -> Self {
        self.bucket_shard_bits = bits;
        self
    }

    pub fn with_lock_table_size(mut self, size: usize) -> Self {
        self.lock_table_size = size;
        self
    }

    pub fn with_compression(mut self, compression: CompressionKind) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> PackerResult<()> {
        self.geometry()?;
        if self.lock_table_size == 0 {
            return Err(PackerError::arg("new packer", "lock table size must be positive"));
        }
        Ok(())
    }

    /// Geometry described by this config, ignoring any persisted value.
    pub fn geometry(&self) -> PackerResult<ShardGeometry> {
        ShardGeometry::new(self.base_bucket_bits, self.bucket_shard_bits)
            .map_err(PackerError::invalid_arg("new packer"))
    }
}

/// The part of the configuration that is fixed at first start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PersistedConfig {
    pub base_bucket_bits: u32,
}

/// Read the persisted config, writing it from `config` if absent.
pub(crate) fn load_or_store(
    ctx: &Context,
    view: &StorageView,
    config: &PackerConfig,
) -> PackerResult<PersistedConfig> {
    const OP: &str = "load config";

    if let Some(entry) = view.get(ctx, CONFIG_KEY).map_err(PackerError::storage(OP))? {
        let stored: PersistedConfig = serde_json::from_slice(&entry.value)
            .map_err(|source| PackerError::Config { op: OP, source })?;
        if stored.base_bucket_bits != config.base_bucket_bits {
            info!(
                name = %config.name,
                configured = config.base_bucket_bits,
                stored = stored.base_bucket_bits,
                "using persisted base bucket bits"
            );
        }
        return Ok(stored);
    }

    let persisted = PersistedConfig {
        base_bucket_bits: config.base_bucket_bits,
    };
    let value =
        serde_json::to_vec(&persisted).map_err(|source| PackerError::Config { op: OP, source })?;
    view.put(ctx, &StorageEntry::new(CONFIG_KEY, value))
        .map_err(PackerError::storage(OP))?;
    debug!(name = %config.name, base_bucket_bits = persisted.base_bucket_bits, "persisted config");
    Ok(persisted)
}
