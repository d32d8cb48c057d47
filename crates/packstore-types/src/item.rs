use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::HashKey;

/// A logical record stored by the packer.
///
/// `id` must be non-empty and is unique within a store. `data` is opaque to
/// the packer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub data: Vec<u8>,
}

impl Item {
    /// Create a new item.
    pub fn new(id: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }

    /// The item's routing coordinate.
    pub fn hash_key(&self) -> HashKey {
        HashKey::of(&self.id)
    }

    /// Reject items that cannot be written.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.id.is_empty() {
            return Err(TypeError::MissingItemId);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_hash_key() {
        let item = Item::new("item1", b"data1".to_vec());
        assert_eq!(item.id, "item1");
        assert_eq!(item.data, b"data1");
        assert_eq!(item.hash_key(), HashKey::of("item1"));
    }

    #[test]
    fn empty_id_is_rejected() {
        let item = Item::new("", b"dontcare".to_vec());
        assert_eq!(item.validate(), Err(TypeError::MissingItemId));
    }

    #[test]
    fn empty_data_is_allowed() {
        assert!(Item::new("present", Vec::new()).validate().is_ok());
    }
}
