/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The value exceeds the backend's per-entry size limit.
    #[error("value too large for {key}: {size} bytes exceeds the limit of {max}")]
    ValueTooLarge { key: String, size: usize, max: usize },

    /// The operation's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The key cannot be represented by this backend.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns `true` for the size-limit sentinel that triggers sharding.
    pub fn is_value_too_large(&self) -> bool {
        matches!(self, Self::ValueTooLarge { .. })
    }

    /// Returns `true` if the error came from the caller's context.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
