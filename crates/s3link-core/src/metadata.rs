//! Object and bucket metadata types

use crate::bucket::{validate_bucket_name, validate_object_key};
use crate::error::Result;
use chrono::{DateTime, Utc};
use cid::Cid;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fmt;

/// A bucket/key pair that passed name validation
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub bucket: String,
    pub key: String,
}

impl ObjectKey {
    /// Validate and build a key
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        validate_bucket_name(&bucket)?;
        validate_object_key(&key)?;
        Ok(Self { bucket, key })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// One stored block of an object body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRef {
    pub cid: Cid,
    pub size: u64,
}

/// Metadata for a stored object
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectMetadata {
    /// Object key within its bucket
    pub key: String,

    /// Size in bytes
    pub size: u64,

    /// Hex MD5 of the body, or `<md5-of-md5s>-<parts>` for multipart objects
    pub etag: String,

    /// Last modified timestamp
    pub last_modified: DateTime<Utc>,

    /// Content type (MIME type)
    pub content_type: Option<String>,

    /// User metadata (`x-amz-meta-*`), keys lowercased
    pub custom_metadata: BTreeMap<String, String>,

    /// Body blocks in order
    pub blocks: Vec<BlockRef>,
}

impl ObjectMetadata {
    /// ETag wrapped in quotes, as sent on the wire
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    /// Whether the object was assembled from multipart parts
    pub fn is_multipart(&self) -> bool {
        self.etag.contains('-')
    }
}

/// Caller-supplied attributes for a write
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub custom_metadata: BTreeMap<String, String>,
}

/// Bucket information
#[derive(Clone, Debug, PartialEq)]
pub struct BucketInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A stored multipart part, recorded by the backend on upload
#[derive(Clone, Debug, PartialEq)]
pub struct PartRecord {
    pub part_number: u32,
    /// Hex MD5 of the part body
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub blocks: Vec<BlockRef>,
}

/// Hex-encoded MD5 digest
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// S3 multipart ETag: MD5 over the concatenated binary part digests, then `-N`
pub fn multipart_etag<'a, I>(part_etags: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Md5::new();
    let mut count = 0usize;
    for etag in part_etags {
        match hex::decode(etag) {
            Ok(raw) => hasher.update(&raw),
            Err(_) => hasher.update(etag.as_bytes()),
        }
        count += 1;
    }
    format!("{}-{}", hex::encode(hasher.finalize()), count)
}
