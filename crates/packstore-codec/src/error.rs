use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode bucket protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed ({algorithm}): {reason}")]
    DecompressionFailed {
        algorithm: &'static str,
        reason: String,
    },

    #[error("bucket key mismatch: stored under {expected:?} but decoded {actual:?}")]
    KeyMismatch { expected: String, actual: String },
}

pub type CodecResult<T> = Result<T, CodecError>;
