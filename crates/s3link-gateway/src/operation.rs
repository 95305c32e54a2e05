//! Parsed S3 operations and their results

use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3link_core::{BucketInfo, ListPage, ObjectKey, ObjectMetadata, PartRecord, PutOptions};

/// ListObjects flavour and its cursor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListVersion {
    V1 {
        marker: Option<String>,
    },
    V2 {
        continuation_token: Option<String>,
        start_after: Option<String>,
        fetch_owner: bool,
    },
}

/// ListObjects / ListObjectsV2 request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub version: ListVersion,
    pub prefix: String,
    pub delimiter: Option<String>,
    /// As requested; clamped by the dispatcher
    pub max_keys: Option<usize>,
    /// `encoding-type=url`
    pub url_encoding: bool,
    /// `metadata=true`
    pub include_metadata: bool,
}

/// Conditional request headers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// GetObject / HeadObject request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetObjectRequest {
    pub key: ObjectKey,
    /// Raw `Range` header
    pub range: Option<String>,
    pub conditions: Conditions,
}

/// A part named in CompleteMultipartUpload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    /// Unquoted
    pub etag: String,
}

/// A parsed S3 request
#[derive(Clone, Debug)]
pub enum S3Operation {
    ListBuckets,
    CreateBucket {
        bucket: String,
    },
    DeleteBucket {
        bucket: String,
    },
    HeadBucket {
        bucket: String,
    },
    GetBucketLocation {
        bucket: String,
    },
    ListObjects(ListObjectsRequest),
    ListMultipartUploads {
        bucket: String,
        prefix: String,
        max_uploads: Option<usize>,
    },
    GetObject(GetObjectRequest),
    HeadObject(GetObjectRequest),
    PutObject {
        key: ObjectKey,
        body: Bytes,
        /// Raw 16-byte digest from `Content-MD5`
        content_md5: Option<Vec<u8>>,
        options: PutOptions,
    },
    CopyObject {
        source: ObjectKey,
        destination: ObjectKey,
        /// Set when `x-amz-metadata-directive: REPLACE`
        replace: Option<PutOptions>,
    },
    DeleteObject {
        key: ObjectKey,
    },
    DeleteObjects {
        bucket: String,
        keys: Vec<String>,
        quiet: bool,
    },
    InitiateMultipartUpload {
        key: ObjectKey,
        options: PutOptions,
    },
    UploadPart {
        key: ObjectKey,
        upload_id: String,
        part_number: u32,
        body: Bytes,
        content_md5: Option<Vec<u8>>,
    },
    CompleteMultipartUpload {
        key: ObjectKey,
        upload_id: String,
        parts: Vec<CompletedPart>,
    },
    AbortMultipartUpload {
        key: ObjectKey,
        upload_id: String,
    },
    ListParts {
        key: ObjectKey,
        upload_id: String,
        part_number_marker: u32,
        max_parts: Option<usize>,
    },
}

impl S3Operation {
    /// Operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListBuckets => "ListBuckets",
            Self::CreateBucket { .. } => "CreateBucket",
            Self::DeleteBucket { .. } => "DeleteBucket",
            Self::HeadBucket { .. } => "HeadBucket",
            Self::GetBucketLocation { .. } => "GetBucketLocation",
            Self::ListObjects(req) => match req.version {
                ListVersion::V1 { .. } => "ListObjects",
                ListVersion::V2 { .. } => "ListObjectsV2",
            },
            Self::ListMultipartUploads { .. } => "ListMultipartUploads",
            Self::GetObject(_) => "GetObject",
            Self::HeadObject(_) => "HeadObject",
            Self::PutObject { .. } => "PutObject",
            Self::CopyObject { .. } => "CopyObject",
            Self::DeleteObject { .. } => "DeleteObject",
            Self::DeleteObjects { .. } => "DeleteObjects",
            Self::InitiateMultipartUpload { .. } => "CreateMultipartUpload",
            Self::UploadPart { .. } => "UploadPart",
            Self::CompleteMultipartUpload { .. } => "CompleteMultipartUpload",
            Self::AbortMultipartUpload { .. } => "AbortMultipartUpload",
            Self::ListParts { .. } => "ListParts",
        }
    }

    /// Bucket the operation targets
    pub fn bucket(&self) -> Option<&str> {
        match self {
            Self::ListBuckets => None,
            Self::CreateBucket { bucket }
            | Self::DeleteBucket { bucket }
            | Self::HeadBucket { bucket }
            | Self::GetBucketLocation { bucket }
            | Self::ListMultipartUploads { bucket, .. }
            | Self::DeleteObjects { bucket, .. } => Some(bucket),
            Self::ListObjects(req) => Some(&req.bucket),
            Self::GetObject(req) | Self::HeadObject(req) => Some(&req.key.bucket),
            Self::CopyObject { destination, .. } => Some(&destination.bucket),
            Self::PutObject { key, .. }
            | Self::DeleteObject { key }
            | Self::InitiateMultipartUpload { key, .. }
            | Self::UploadPart { key, .. }
            | Self::CompleteMultipartUpload { key, .. }
            | Self::AbortMultipartUpload { key, .. }
            | Self::ListParts { key, .. } => Some(&key.bucket),
        }
    }
}

/// A listing ready for encoding
#[derive(Clone, Debug)]
pub struct ObjectListing {
    pub request: ListObjectsRequest,
    /// After clamping
    pub max_keys: usize,
    pub page: ListPage,
    /// Emit `x-amz-meta-*` and content type per entry
    pub include_metadata: bool,
}

/// One in-progress upload in ListMultipartUploads
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSummary {
    pub key: String,
    pub upload_id: String,
    pub initiated_at: DateTime<Utc>,
    pub owner: String,
}

#[derive(Clone, Debug)]
pub struct UploadsListing {
    pub bucket: String,
    pub prefix: String,
    pub max_uploads: usize,
    pub uploads: Vec<UploadSummary>,
    pub is_truncated: bool,
}

#[derive(Clone, Debug)]
pub struct PartsListing {
    pub key: ObjectKey,
    pub upload_id: String,
    pub owner: String,
    pub part_number_marker: u32,
    pub max_parts: usize,
    pub parts: Vec<PartRecord>,
    pub is_truncated: bool,
}

impl PartsListing {
    pub fn next_part_number_marker(&self) -> Option<u32> {
        if self.is_truncated {
            self.parts.last().map(|p| p.part_number)
        } else {
            None
        }
    }
}

/// A key DeleteObjects could not remove
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteResult {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteFailure>,
    pub quiet: bool,
}

/// Successful outcome of an operation
#[derive(Clone, Debug)]
pub enum S3Output {
    Buckets(Vec<BucketInfo>),
    BucketCreated {
        bucket: String,
    },
    /// 200 with no body
    Empty,
    /// 204
    NoContent,
    Location {
        region: String,
    },
    ObjectList(ObjectListing),
    Object {
        metadata: ObjectMetadata,
        body: Bytes,
        /// Inclusive byte range served, for 206 responses
        range: Option<(u64, u64)>,
    },
    ObjectHead {
        metadata: ObjectMetadata,
    },
    NotModified {
        metadata: ObjectMetadata,
    },
    Stored {
        metadata: ObjectMetadata,
    },
    Copied {
        metadata: ObjectMetadata,
    },
    Deleted(DeleteResult),
    UploadInitiated {
        key: ObjectKey,
        upload_id: String,
    },
    PartStored {
        etag: String,
    },
    UploadCompleted {
        key: ObjectKey,
        metadata: ObjectMetadata,
    },
    Parts(PartsListing),
    Uploads(UploadsListing),
}
