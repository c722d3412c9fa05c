//! Error types for loading and for manager construction.

use vista_assets::{AssetId, DecodeError, SourceFormat, StorageError};

use crate::cache::DiskTierError;

/// Why a model could not be loaded.
///
/// Cloneable so every caller attached to one in-flight load observes the
/// same error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    /// The asset is not in the catalog or its source file is missing.
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// The source file is not a valid file of its format.
    #[error("corrupted source: {0}")]
    CorruptedSource(String),
    /// No decoder is registered for the source format.
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(SourceFormat),
    /// The decoder failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// A retry was requested for an asset that has not failed.
    #[error("no failed load to retry for asset {0}")]
    NoOperationToRetry(AssetId),
    /// The load was abandoned before it finished.
    #[error("load of asset {0} was cancelled")]
    Cancelled(AssetId),
}

impl From<DecodeError> for LoadError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Corrupted(reason) => LoadError::CorruptedSource(reason),
            DecodeError::Failed(reason) => LoadError::DecodeFailed(reason),
            DecodeError::Io(err) => LoadError::DecodeFailed(err.to_string()),
        }
    }
}

impl From<StorageError> for LoadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => LoadError::FileNotFound(name),
            other => LoadError::DecodeFailed(other.to_string()),
        }
    }
}

/// Errors raised while constructing a resource manager.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// The storage could not provide a cache directory.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// The disk tier could not be opened.
    #[error("disk cache error: {0}")]
    DiskTier(#[from] DiskTierError),
}
