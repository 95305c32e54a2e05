//! Error types for the s3link-core crate

use s3link_blockstore::BlockStoreError;
use thiserror::Error;

/// Result type alias using `BackendError`
pub type Result<T> = std::result::Result<T, BackendError>;

/// Why the backend refused a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    /// Storage quota would be exceeded
    Quota,
    /// The backend does not allow this write
    Permission,
}

/// Errors returned by the backend store client
#[derive(Error, Debug)]
pub enum BackendError {
    /// Object not found
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket not found
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Bucket already exists
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// Bucket still holds objects
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    /// Invalid bucket name
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// Object key is empty
    #[error("object key cannot be empty")]
    EmptyObjectKey,

    /// Object key longer than the limit, in bytes
    #[error("object key cannot exceed {0} bytes")]
    ObjectKeyTooLong(usize),

    /// Continuation token could not be decoded
    #[error("invalid continuation token")]
    InvalidContinuationToken,

    /// Transport failure or timeout; the caller may retry
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request; retrying will not help
    #[error("backend rejected request ({kind:?}): {reason}")]
    Rejected { kind: RejectionKind, reason: String },

    /// Stored data does not match its index entry
    #[error("corrupted object data: {0}")]
    Corrupted(String),

    /// Any other block store failure
    #[error("block store error: {0}")]
    BlockStore(BlockStoreError),
}

impl BackendError {
    /// Whether the caller may retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub(crate) fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<BlockStoreError> for BackendError {
    fn from(err: BlockStoreError) -> Self {
        match err {
            e if e.is_transport() => BackendError::Unavailable(e.to_string()),
            BlockStoreError::NotFound(cid) => {
                BackendError::Corrupted(format!("referenced block {} is missing", cid))
            }
            e => BackendError::BlockStore(e),
        }
    }
}
