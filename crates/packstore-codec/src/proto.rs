//! Protobuf records stored in each bucket entry.
//!
//! Field numbers are part of the on-disk format and must never be reused.

use std::collections::BTreeMap;

use packstore_types::{HashKey, Item};

/// One stored item. The id travels with the data so that full scans can
/// report ids without a reverse hash lookup.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemRecord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

impl From<Item> for ItemRecord {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            data: item.data,
        }
    }
}

impl From<ItemRecord> for Item {
    fn from(record: ItemRecord) -> Self {
        Item::new(record.id, record.data)
    }
}

/// A bucket as persisted.
///
/// `items` is the legacy v1 list layout and is only ever read. v2 buckets
/// key `item_map` by the item's hash key.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Bucket {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, repeated, tag = "2")]
    pub items: Vec<ItemRecord>,
    #[prost(bool, tag = "3")]
    pub has_shards: bool,
    #[prost(btree_map = "string, message", tag = "4")]
    pub item_map: BTreeMap<String, ItemRecord>,
}

impl Bucket {
    /// An empty leaf bucket stored under `key`.
    pub fn leaf(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Whether this bucket holds items directly.
    pub fn is_leaf(&self) -> bool {
        !self.has_shards
    }

    /// Number of items held directly (always 0 for an interior bucket).
    pub fn item_count(&self) -> usize {
        if self.has_shards {
            0
        } else {
            self.item_map.len()
        }
    }

    /// Insert or overwrite an item, returning the previous record.
    pub fn insert_item(&mut self, item: Item) -> Option<ItemRecord> {
        let hash = HashKey::of(&item.id);
        self.item_map.insert(hash.into_string(), item.into())
    }

    /// Look up an item by hash key.
    pub fn item(&self, hash: &HashKey) -> Option<&ItemRecord> {
        if self.has_shards {
            return None;
        }
        self.item_map.get(hash.as_str())
    }

    /// Turn this bucket into an interior node.
    pub fn mark_sharded(&mut self) {
        self.has_shards = true;
        self.item_map.clear();
    }
}
