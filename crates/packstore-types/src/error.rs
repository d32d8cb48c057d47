use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid hash key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("missing ID")]
    MissingItemId,

    #[error("{name} ({bits}) should be at least 4")]
    BitsTooSmall { name: &'static str, bits: u32 },

    #[error("{name} ({bits}) is not a multiple of 4")]
    BitsNotMultipleOfFour { name: &'static str, bits: u32 },

    #[error("{name} ({bits}) exceeds the maximum of {max}")]
    BitsTooLarge {
        name: &'static str,
        bits: u32,
        max: u32,
    },

    #[error("key {key:?} is shorter than the root width of {width} hex digits")]
    KeyTooShort { key: String, width: usize },

    #[error("invalid bucket key {key:?}: {reason}")]
    InvalidBucketKey { key: String, reason: String },

    #[error("hash {hash} is not routed under bucket {cache_key:?}")]
    NotUnderBucket { hash: String, cache_key: String },
}
