use std::fmt;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

type Blake2b256 = Blake2b<U32>;

/// Routing coordinate of an item.
///
/// A `HashKey` is the lowercase hex encoding of the BLAKE2b-256 hash of an
/// item ID's UTF-8 bytes. It is always [`HashKey::LEN`] characters long, and
/// every bucket cache key an item is routed to is a proper prefix of it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashKey(String);

impl HashKey {
    /// Number of hex characters in a hash key.
    pub const LEN: usize = 64;

    /// Hash an item ID.
    pub fn of(id: &str) -> Self {
        let digest = Blake2b256::digest(id.as_bytes());
        Self(hex::encode(digest))
    }

    /// Parse an already-computed hex hash key.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if s.len() != Self::LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::LEN,
                actual: s.len(),
            });
        }
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(TypeError::InvalidHex(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> &str {
        &self.0[..8]
    }

    /// Returns `true` if `cache_key` routes this hash (is a prefix of it).
    pub fn is_under(&self, cache_key: &str) -> bool {
        self.0.starts_with(cache_key)
    }

    /// Consume into the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashKey({})", self.short_hex())
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HashKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(HashKey::of("item1"), HashKey::of("item1"));
    }

    #[test]
    fn different_ids_produce_different_keys() {
        assert_ne!(HashKey::of("item1"), HashKey::of("item2"));
    }

    #[test]
    fn key_is_64_lowercase_hex() {
        let key = HashKey::of("entity_id");
        assert_eq!(key.as_str().len(), HashKey::LEN);
        assert!(key
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    }

    #[test]
    fn empty_id_still_hashes() {
        // The hash is total; rejecting empty IDs is the caller's job.
        assert_eq!(HashKey::of("").as_str().len(), HashKey::LEN);
    }

    #[test]
    fn known_vector() {
        // BLAKE2b-256 of the empty string.
        assert_eq!(
            HashKey::of("").as_str(),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }

    #[test]
    fn hex_roundtrip() {
        let key = HashKey::of("test");
        let parsed = HashKey::from_hex(key.as_str()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn from_hex_rejects_bad_length() {
        let err = HashKey::from_hex("abc").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 64,
                actual: 3
            }
        );
    }

    #[test]
    fn from_hex_rejects_uppercase() {
        let upper = HashKey::of("test").as_str().to_uppercase();
        assert!(matches!(
            HashKey::from_hex(&upper),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn is_under_prefix() {
        let key = HashKey::of("test");
        let prefix = &key.as_str()[..3];
        assert!(key.is_under(prefix));
        assert!(key.is_under(""));
    }

    #[test]
    fn display_is_full_hex() {
        let key = HashKey::of("test");
        assert_eq!(format!("{key}"), key.as_str());
        assert!(format!("{key:?}").starts_with("HashKey("));
    }

    #[test]
    fn serde_roundtrip() {
        let key = HashKey::of("serde test");
        let json = serde_json::to_string(&key).unwrap();
        let parsed: HashKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, parsed);
    }
}
