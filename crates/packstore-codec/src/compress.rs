//! Compression framing.
//!
//! Every encoded bucket starts with a one-byte canary naming the algorithm
//! that produced the rest of the bytes. Payloads without a known canary are
//! passed through untouched.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

const SNAPPY_CANARY: u8 = b'S';
const ZSTD_CANARY: u8 = b'Z';
const ZSTD_LEVEL: i32 = 3;

/// Compression algorithm applied on write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Snappy,
    Zstd,
}

impl CompressionKind {
    pub const fn canary(self) -> u8 {
        match self {
            Self::Snappy => SNAPPY_CANARY,
            Self::Zstd => ZSTD_CANARY,
        }
    }

    pub fn from_canary(byte: u8) -> Option<Self> {
        match byte {
            SNAPPY_CANARY => Some(Self::Snappy),
            ZSTD_CANARY => Some(Self::Zstd),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Snappy => "snappy",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Self::Snappy),
            "zstd" => Ok(Self::Zstd),
            other => Err(format!("unknown compression {other:?} (expected snappy or zstd)")),
        }
    }
}

/// Compress `data` and prepend the canary.
pub fn compress(kind: CompressionKind, data: &[u8]) -> CodecResult<Vec<u8>> {
    let body = match kind {
        CompressionKind::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| CodecError::CompressionFailed(e.to_string()))?,
        CompressionKind::Zstd => zstd::encode_all(data, ZSTD_LEVEL)
            .map_err(|e| CodecError::CompressionFailed(e.to_string()))?,
    };
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(kind.canary());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Strip the canary and decompress, or borrow `bytes` as-is when there is no
/// recognised canary.
pub fn decompress(bytes: &[u8]) -> CodecResult<Cow<'_, [u8]>> {
    let Some((&first, body)) = bytes.split_first() else {
        return Ok(Cow::Borrowed(bytes));
    };
    match CompressionKind::from_canary(first) {
        None => Ok(Cow::Borrowed(bytes)),
        Some(CompressionKind::Snappy) => snap::raw::Decoder::new()
            .decompress_vec(body)
            .map(Cow::Owned)
            .map_err(|e| CodecError::DecompressionFailed {
                algorithm: "snappy",
                reason: e.to_string(),
            }),
        Some(CompressionKind::Zstd) => zstd::decode_all(body)
            .map(Cow::Owned)
            .map_err(|e| CodecError::DecompressionFailed {
                algorithm: "zstd",
                reason: e.to_string(),
            }),
    }
}
