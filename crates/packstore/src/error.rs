use std::fmt;

use packstore_codec::CodecError;
use packstore_storage::StorageError;
use packstore_types::TypeError;
use thiserror::Error;

/// Coarse classification of a [`PackerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input from the caller. Never retryable.
    Arg,
    /// The packer has not finished loading from storage.
    NotInitialized,
    /// A stored bucket (or the persisted config) could not be encoded or decoded.
    Codec,
    /// The storage backend failed.
    Storage,
    /// A runtime invariant was violated.
    Internal,
    /// The caller's context was cancelled or timed out.
    Cancelled,
}

/// Errors returned by packer operations.
///
/// Every variant names the operation that failed in `op`.
#[derive(Debug, Error)]
pub enum PackerError {
    #[error("{op}: {reason}")]
    Arg { op: &'static str, reason: String },

    #[error("{op}: packer is not initialized")]
    NotInitialized { op: &'static str },

    #[error("{op}: {source}")]
    Codec {
        op: &'static str,
        #[source]
        source: CodecError,
    },

    #[error("{op}: invalid persisted config: {source}")]
    Config {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("{op}: internal error: {reason}")]
    Internal { op: &'static str, reason: String },

    #[error(transparent)]
    Multiple(#[from] MultiError),
}

impl PackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Arg { .. } => ErrorKind::Arg,
            Self::NotInitialized { .. } => ErrorKind::NotInitialized,
            Self::Codec { .. } | Self::Config { .. } => ErrorKind::Codec,
            Self::Storage { source, .. } if source.is_cancellation() => ErrorKind::Cancelled,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Multiple(multi) => multi
                .errors()
                .first()
                .map_or(ErrorKind::Internal, PackerError::kind),
        }
    }

    /// Whether a storage size limit is behind this error, directly or inside
    /// a collected [`MultiError`].
    pub fn is_value_too_large(&self) -> bool {
        match self {
            Self::Storage { source, .. } => source.is_value_too_large(),
            Self::Multiple(multi) => multi.errors().iter().any(PackerError::is_value_too_large),
            _ => false,
        }
    }

    pub(crate) fn arg(op: &'static str, reason: impl fmt::Display) -> Self {
        Self::Arg {
            op,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn internal(op: &'static str, reason: impl fmt::Display) -> Self {
        Self::Internal {
            op,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn storage(op: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| Self::Storage { op, source }
    }

    pub(crate) fn codec(op: &'static str) -> impl FnOnce(CodecError) -> Self {
        move |source| Self::Codec { op, source }
    }

    pub(crate) fn invalid_arg(op: &'static str) -> impl FnOnce(TypeError) -> Self {
        move |e| Self::arg(op, e)
    }
}

/// Several errors collected from one operation.
///
/// The first error is the one that aborted the operation; the rest come from
/// best-effort cleanup or from independent units of a batch.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<PackerError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: PackerError) {
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[PackerError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok` when nothing was collected, the lone error when there is one,
    /// and [`PackerError::Multiple`] otherwise.
    pub fn into_result(mut self) -> PackerResult<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(PackerError::Multiple(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

pub type PackerResult<T> = Result<T, PackerError>;
