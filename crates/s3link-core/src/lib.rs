//! # s3link Core
//!
//! The backend store client used by the gateway: a narrow object-store
//! interface addressed by bucket and key, plus an implementation that keeps
//! a bucket index in memory and stores object bodies as content-addressed
//! blocks.
//!
//! ## Features
//!
//! - **ObjectStore trait**: get, put, delete and list with S3-style metadata
//! - **Listing**: prefix/delimiter grouping, continuation tokens, scan caps
//! - **Connection pool**: bounded concurrency with per-call timeouts
//! - **Multipart support**: parts become blocks, completion links them

pub mod bucket;
pub mod error;
pub mod listing;
pub mod metadata;
pub mod pool;
pub mod store;

pub use bucket::{validate_bucket_name, validate_object_key, BucketIndex};
pub use error::{BackendError, RejectionKind, Result};
pub use listing::{ListPage, ListQuery};
pub use metadata::{
    md5_hex, multipart_etag, BlockRef, BucketInfo, ObjectKey, ObjectMetadata, PartRecord,
    PutOptions,
};
pub use pool::{ConnectionPool, PooledConnection};
pub use store::{BlockObjectStore, ObjectStore, StoreConfig};

/// S3 maximum number of keys returned by one list call
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// Largest number of index entries one list call may walk
pub const DEFAULT_EXHAUSTIVE_LIMIT: usize = 100_000;

/// Maximum key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;
