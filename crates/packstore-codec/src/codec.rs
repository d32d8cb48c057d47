use prost::Message;
use tracing::debug;

use packstore_types::Item;

use crate::compress::{compress, decompress, CompressionKind};
use crate::error::{CodecError, CodecResult};
use crate::proto::Bucket;

/// Encodes buckets to the framed on-disk form and back.
///
/// Decoding does not depend on the configured compression: the canary in
/// each payload names its own algorithm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BucketCodec {
    compression: CompressionKind,
}

impl BucketCodec {
    pub fn new(compression: CompressionKind) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> CompressionKind {
        self.compression
    }

    /// Marshal and compress a bucket.
    pub fn encode(&self, bucket: &Bucket) -> CodecResult<Vec<u8>> {
        let raw = bucket.encode_to_vec();
        let framed = compress(self.compression, &raw)?;
        debug!(
            key = %bucket.key,
            raw_len = raw.len(),
            framed_len = framed.len(),
            "encoded bucket"
        );
        Ok(framed)
    }

    /// Decompress (if framed) and unmarshal a bucket.
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<Bucket> {
        let payload = decompress(bytes)?;
        Ok(Bucket::decode(payload.as_ref())?)
    }

    /// Decode a bucket read from `key` and check it claims the same key.
    pub fn decode_at(&self, key: &str, bytes: &[u8]) -> CodecResult<Bucket> {
        let bucket = self.decode(bytes)?;
        if bucket.key != key {
            return Err(CodecError::KeyMismatch {
                expected: key.to_string(),
                actual: bucket.key,
            });
        }
        Ok(bucket)
    }
}

/// Items of a legacy v1 bucket, which stored them as a list.
pub fn legacy_items(bucket: Bucket) -> Vec<Item> {
    bucket.items.into_iter().map(Item::from).collect()
}
