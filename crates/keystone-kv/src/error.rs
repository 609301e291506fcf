//! Error types for key-value backend operations.

use thiserror::Error;

/// Result alias for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors raised by key-value backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// The requested bucket does not exist.
    #[error("bucket not found")]
    BucketNotFound {
        /// Bucket name.
        bucket: String,
    },
    /// The requested key is absent or has been deleted.
    #[error("key not found")]
    KeyNotFound {
        /// Bucket name.
        bucket: String,
        /// Key name.
        key: String,
    },
    /// The bucket was destroyed while a watch was active.
    #[error("bucket deleted")]
    BucketDeleted {
        /// Bucket name.
        bucket: String,
    },
    /// The backend stopped feeding a watch without reporting a cause.
    #[error("watch closed")]
    WatchClosed {
        /// Bucket name.
        bucket: String,
    },
    /// A bucket with the same name already exists.
    #[error("bucket already exists")]
    BucketExists {
        /// Bucket name.
        bucket: String,
    },
}

impl KvError {
    /// Name of the bucket involved in the failure.
    #[must_use]
    pub fn bucket(&self) -> &str {
        match self {
            Self::BucketNotFound { bucket }
            | Self::KeyNotFound { bucket, .. }
            | Self::BucketDeleted { bucket }
            | Self::WatchClosed { bucket }
            | Self::BucketExists { bucket } => bucket,
        }
    }
}
