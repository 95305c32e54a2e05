//! Operation dispatch
//!
//! Checks the caller's grant, applies the compatibility limits and runs the
//! operation against the object store and the multipart manager.

use crate::auth::AccessGrant;
use crate::config::S3CompatibilityConfig;
use crate::error::{ApiError, Result, S3ErrorCode};
use crate::multipart::MultipartManager;
use crate::operation::{
    Conditions, DeleteFailure, DeleteResult, GetObjectRequest, ListObjectsRequest, ListVersion,
    ObjectListing, S3Operation, S3Output,
};
use md5::{Digest, Md5};
use s3link_core::{BackendError, ListQuery, ObjectKey, ObjectMetadata, ObjectStore};
use std::sync::Arc;
use tracing::debug;

/// Parse a single `bytes=` range against an object size into inclusive bounds
pub fn parse_range_header(range: &str, total_size: u64) -> std::result::Result<(u64, u64), ()> {
    let range = range.trim().strip_prefix("bytes=").ok_or(())?;
    if total_size == 0 || range.contains(',') {
        return Err(());
    }
    let (start_str, end_str) = range.split_once('-').ok_or(())?;
    let last = total_size - 1;

    if start_str.is_empty() {
        // bytes=-500 is the last 500 bytes
        let suffix: u64 = end_str.parse().map_err(|_| ())?;
        if suffix == 0 {
            return Err(());
        }
        Ok((total_size.saturating_sub(suffix), last))
    } else if end_str.is_empty() {
        let start: u64 = start_str.parse().map_err(|_| ())?;
        if start > last {
            return Err(());
        }
        Ok((start, last))
    } else {
        let start: u64 = start_str.parse().map_err(|_| ())?;
        let end: u64 = end_str.parse().map_err(|_| ())?;
        if start > end || start > last {
            return Err(());
        }
        Ok((start, end.min(last)))
    }
}

/// Whether an `If-Match`/`If-None-Match` value names this ETag
fn etag_matches(header: &str, etag: &str) -> bool {
    header
        .split(',')
        .map(|v| v.trim().trim_start_matches("W/").trim_matches('"'))
        .any(|v| v == "*" || v == etag)
}

enum Precondition {
    Proceed,
    NotModified,
}

fn evaluate(conditions: &Conditions, metadata: &ObjectMetadata) -> Result<Precondition> {
    let modified = metadata.last_modified.timestamp();

    if let Some(if_match) = &conditions.if_match {
        if !etag_matches(if_match, &metadata.etag) {
            return Err(ApiError::s3(
                S3ErrorCode::PreconditionFailed,
                "At least one of the pre-conditions you specified did not hold",
            ));
        }
    } else if let Some(since) = conditions.if_unmodified_since {
        if modified > since.timestamp() {
            return Err(ApiError::s3(
                S3ErrorCode::PreconditionFailed,
                "At least one of the pre-conditions you specified did not hold",
            ));
        }
    }

    if let Some(if_none_match) = &conditions.if_none_match {
        if etag_matches(if_none_match, &metadata.etag) {
            return Ok(Precondition::NotModified);
        }
    } else if let Some(since) = conditions.if_modified_since {
        if modified <= since.timestamp() {
            return Ok(Precondition::NotModified);
        }
    }
    Ok(Precondition::Proceed)
}

fn check_md5(expected: Option<&[u8]>, body: &[u8]) -> Result<()> {
    match expected {
        Some(digest) if Md5::digest(body).as_slice() != digest => Err(ApiError::s3(
            S3ErrorCode::BadDigest,
            "The Content-MD5 you specified did not match what we received",
        )),
        _ => Ok(()),
    }
}

fn require(allowed: bool, action: &str, resource: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(ApiError::s3_with_resource(
            S3ErrorCode::AccessDenied,
            format!("Access Denied: {} is not permitted", action),
            resource,
        ))
    }
}

/// Check the grant covers the operation before anything touches the backend
pub fn authorize(op: &S3Operation, grant: &AccessGrant) -> Result<()> {
    let p = grant.permissions;
    let name = op.name();
    match op {
        S3Operation::ListBuckets => require(p.list, name, "/"),
        S3Operation::CreateBucket { bucket } => require(
            p.write && grant.allows_bucket(bucket) && grant.is_unscoped(),
            name,
            bucket,
        ),
        S3Operation::DeleteBucket { bucket } => require(
            p.delete && grant.allows_bucket(bucket) && grant.is_unscoped(),
            name,
            bucket,
        ),
        S3Operation::HeadBucket { bucket } | S3Operation::GetBucketLocation { bucket } => {
            require((p.read || p.list) && grant.allows_bucket(bucket), name, bucket)
        }
        S3Operation::ListObjects(req) => require(
            p.list && grant.allows_prefix(&req.bucket, &req.prefix),
            name,
            &req.bucket,
        ),
        S3Operation::ListMultipartUploads { bucket, prefix, .. } => require(
            p.list && grant.allows_prefix(bucket, prefix),
            name,
            bucket,
        ),
        S3Operation::GetObject(req) | S3Operation::HeadObject(req) => require(
            p.read && grant.allows_key(&req.key.bucket, &req.key.key),
            name,
            &req.key.to_string(),
        ),
        S3Operation::CopyObject {
            source,
            destination,
            ..
        } => {
            require(
                p.read && grant.allows_key(&source.bucket, &source.key),
                name,
                &source.to_string(),
            )?;
            require(
                p.write && grant.allows_key(&destination.bucket, &destination.key),
                name,
                &destination.to_string(),
            )
        }
        S3Operation::PutObject { key, .. }
        | S3Operation::InitiateMultipartUpload { key, .. }
        | S3Operation::UploadPart { key, .. }
        | S3Operation::CompleteMultipartUpload { key, .. }
        | S3Operation::AbortMultipartUpload { key, .. } => require(
            p.write && grant.allows_key(&key.bucket, &key.key),
            name,
            &key.to_string(),
        ),
        S3Operation::ListParts { key, .. } => require(
            (p.read || p.list) && grant.allows_key(&key.bucket, &key.key),
            name,
            &key.to_string(),
        ),
        S3Operation::DeleteObject { key } => require(
            p.delete && grant.allows_key(&key.bucket, &key.key),
            name,
            &key.to_string(),
        ),
        // individual keys are checked one by one
        S3Operation::DeleteObjects { bucket, .. } => {
            require(p.delete && grant.allows_bucket(bucket), name, bucket)
        }
    }
}

/// Runs authorized operations
pub struct Dispatcher {
    store: Arc<dyn ObjectStore>,
    uploads: Arc<MultipartManager>,
    s3: S3CompatibilityConfig,
    region: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        uploads: Arc<MultipartManager>,
        s3: S3CompatibilityConfig,
        region: impl Into<String>,
    ) -> Self {
        Self {
            store,
            uploads,
            s3,
            region: region.into(),
        }
    }

    /// Authorize and execute one operation
    pub async fn dispatch(&self, op: S3Operation, grant: &AccessGrant) -> Result<S3Output> {
        authorize(&op, grant)?;
        debug!(operation = op.name(), bucket = ?op.bucket(), access_key = %grant.access_key_id, "Dispatching");

        match op {
            S3Operation::ListBuckets => {
                let mut buckets = self.store.list_buckets().await?;
                buckets.retain(|b| grant.allows_bucket(&b.name));
                Ok(S3Output::Buckets(buckets))
            }
            S3Operation::CreateBucket { bucket } => {
                self.store.create_bucket(&bucket).await?;
                Ok(S3Output::BucketCreated { bucket })
            }
            S3Operation::DeleteBucket { bucket } => {
                self.store.delete_bucket(&bucket).await?;
                Ok(S3Output::NoContent)
            }
            S3Operation::HeadBucket { bucket } => {
                self.store.head_bucket(&bucket).await?;
                Ok(S3Output::Empty)
            }
            S3Operation::GetBucketLocation { bucket } => {
                self.store.head_bucket(&bucket).await?;
                Ok(S3Output::Location {
                    region: self.region.clone(),
                })
            }
            S3Operation::ListObjects(req) => self.list_objects(req).await,
            S3Operation::ListMultipartUploads {
                bucket,
                prefix,
                max_uploads,
            } => {
                self.store.head_bucket(&bucket).await?;
                Ok(S3Output::Uploads(
                    self.uploads.list_uploads(&bucket, &prefix, max_uploads),
                ))
            }
            S3Operation::GetObject(req) => self.get_object(req).await,
            S3Operation::HeadObject(req) => {
                let metadata = self.store.head(&req.key).await?;
                Ok(match evaluate(&req.conditions, &metadata)? {
                    Precondition::NotModified => S3Output::NotModified { metadata },
                    Precondition::Proceed => S3Output::ObjectHead { metadata },
                })
            }
            S3Operation::PutObject {
                key,
                body,
                content_md5,
                options,
            } => {
                check_md5(content_md5.as_deref(), &body)?;
                let metadata = self.store.put(&key, body, options).await?;
                Ok(S3Output::Stored { metadata })
            }
            S3Operation::CopyObject {
                source,
                destination,
                replace,
            } => {
                if self.s3.disable_copy_object {
                    return Err(ApiError::s3(
                        S3ErrorCode::NotImplemented,
                        "CopyObject is disabled on this gateway",
                    ));
                }
                if source == destination && replace.is_none() {
                    return Err(ApiError::s3(
                        S3ErrorCode::InvalidRequest,
                        "This copy request is illegal because it is trying to copy an object to itself without changing the object's metadata",
                    ));
                }
                let metadata = self.store.copy(&source, &destination, replace).await?;
                Ok(S3Output::Copied { metadata })
            }
            S3Operation::DeleteObject { key } => match self.store.delete(&key).await {
                Ok(()) | Err(BackendError::NotFound { .. }) => Ok(S3Output::NoContent),
                Err(e) => Err(e.into()),
            },
            S3Operation::DeleteObjects {
                bucket,
                keys,
                quiet,
            } => self.delete_objects(grant, bucket, keys, quiet).await,
            S3Operation::InitiateMultipartUpload { key, options } => {
                self.store.head_bucket(&key.bucket).await?;
                let upload_id = self
                    .uploads
                    .create(key.clone(), options, grant.access_key_id.clone());
                Ok(S3Output::UploadInitiated { key, upload_id })
            }
            S3Operation::UploadPart {
                key,
                upload_id,
                part_number,
                body,
                content_md5,
            } => {
                check_md5(content_md5.as_deref(), &body)?;
                let record = self
                    .uploads
                    .upload_part(self.store.as_ref(), &key, &upload_id, part_number, body)
                    .await?;
                Ok(S3Output::PartStored { etag: record.etag })
            }
            S3Operation::CompleteMultipartUpload {
                key,
                upload_id,
                parts,
            } => {
                let metadata = self
                    .uploads
                    .complete(self.store.as_ref(), &key, &upload_id, &parts)
                    .await?;
                Ok(S3Output::UploadCompleted { key, metadata })
            }
            S3Operation::AbortMultipartUpload { key, upload_id } => {
                self.uploads
                    .abort(self.store.as_ref(), &key, &upload_id)
                    .await?;
                Ok(S3Output::NoContent)
            }
            S3Operation::ListParts {
                key,
                upload_id,
                part_number_marker,
                max_parts,
            } => Ok(S3Output::Parts(
                self.uploads
                    .list_parts(&key, &upload_id, part_number_marker, max_parts)
                    .await?,
            )),
        }
    }

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<S3Output> {
        let max_keys = req
            .max_keys
            .unwrap_or(s3link_core::DEFAULT_MAX_KEYS)
            .min(self.s3.max_keys_limit);

        let mut query = ListQuery::with_prefix(req.prefix.clone()).max_keys(max_keys);
        query.delimiter = req.delimiter.clone();
        match &req.version {
            ListVersion::V1 { marker } => query.start_after = marker.clone(),
            ListVersion::V2 {
                continuation_token,
                start_after,
                ..
            } => {
                query.start_after = start_after.clone();
                query.continuation_token = continuation_token.clone();
            }
        }

        let page = self.store.list(&req.bucket, &query).await?;
        Ok(S3Output::ObjectList(ObjectListing {
            include_metadata: req.include_metadata && self.s3.include_custom_metadata_listing,
            request: req,
            max_keys,
            page,
        }))
    }

    async fn get_object(&self, req: GetObjectRequest) -> Result<S3Output> {
        let metadata = self.store.head(&req.key).await?;
        if let Precondition::NotModified = evaluate(&req.conditions, &metadata)? {
            return Ok(S3Output::NotModified { metadata });
        }
        let invalid_range = || {
            ApiError::s3_with_resource(
                S3ErrorCode::InvalidRange,
                "The requested range is not satisfiable",
                req.key.to_string(),
            )
        };

        let (body, current, range) = match req.range.as_deref() {
            Some(range) => {
                let (start, end) =
                    parse_range_header(range, metadata.size).map_err(|_| invalid_range())?;
                let (body, current) = self.store.get_range(&req.key, start..end + 1).await?;
                (body, current, Some(start))
            }
            None => {
                let (body, current) = self.store.get(&req.key).await?;
                (body, current, None)
            }
        };

        // overwritten since the head call: answer for the version actually read
        if current.etag != metadata.etag {
            debug!(key = %req.key, "Object replaced during read");
            if let Precondition::NotModified = evaluate(&req.conditions, &current)? {
                return Ok(S3Output::NotModified { metadata: current });
            }
        }

        let range = match range {
            Some(_) if body.is_empty() => return Err(invalid_range()),
            Some(start) => Some((start, start + body.len() as u64 - 1)),
            None => None,
        };
        Ok(S3Output::Object {
            metadata: current,
            body,
            range,
        })
    }

    async fn delete_objects(
        &self,
        grant: &AccessGrant,
        bucket: String,
        keys: Vec<String>,
        quiet: bool,
    ) -> Result<S3Output> {
        self.store.head_bucket(&bucket).await?;
        let mut result = DeleteResult {
            quiet,
            ..Default::default()
        };

        for key in keys {
            if !grant.allows_key(&bucket, &key) {
                result.errors.push(DeleteFailure {
                    key,
                    code: S3ErrorCode::AccessDenied.as_str(),
                    message: "Access Denied".to_string(),
                });
                continue;
            }
            let outcome = match ObjectKey::new(bucket.as_str(), key.as_str()) {
                Ok(object) => self.store.delete(&object).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) | Err(BackendError::NotFound { .. }) => result.deleted.push(key),
                Err(e) => {
                    let error = ApiError::from(e);
                    result.errors.push(DeleteFailure {
                        key,
                        code: error.error_code().as_str(),
                        message: error.public_message(),
                    });
                }
            }
        }
        Ok(S3Output::Deleted(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Permissions;
    use crate::operation::CompletedPart;
    use bytes::Bytes;
    use chrono::Duration;
    use s3link_blockstore::MemoryBlockStore;
    use s3link_core::{md5_hex, BlockObjectStore, PutOptions, StoreConfig};

    async fn dispatcher(s3: S3CompatibilityConfig) -> Dispatcher {
        let store = BlockObjectStore::new(Arc::new(MemoryBlockStore::new()), StoreConfig::default())
            .unwrap();
        store.create_bucket("shared").await.unwrap();
        Dispatcher::new(
            Arc::new(store),
            Arc::new(MultipartManager::new(3600, 5)),
            s3,
            "us-east-1",
        )
    }

    fn admin() -> AccessGrant {
        AccessGrant::new("AKIDADMIN", "secret")
    }

    fn key(k: &str) -> ObjectKey {
        ObjectKey::new("shared", k).unwrap()
    }

    fn put(k: &str, body: &'static [u8]) -> S3Operation {
        S3Operation::PutObject {
            key: key(k),
            body: Bytes::from_static(body),
            content_md5: None,
            options: PutOptions::default(),
        }
    }

    fn get(k: &str) -> S3Operation {
        S3Operation::GetObject(GetObjectRequest {
            key: key(k),
            range: None,
            conditions: Conditions::default(),
        })
    }

    fn list(prefix: &str, max_keys: Option<usize>) -> S3Operation {
        S3Operation::ListObjects(ListObjectsRequest {
            bucket: "shared".to_string(),
            version: ListVersion::V2 {
                continuation_token: None,
                start_after: None,
                fetch_owner: false,
            },
            prefix: prefix.to_string(),
            delimiter: None,
            max_keys,
            url_encoding: false,
            include_metadata: false,
        })
    }

    #[test]
    fn test_parse_range_header() {
        assert_eq!(parse_range_header("bytes=0-9", 100), Ok((0, 9)));
        assert_eq!(parse_range_header("bytes=90-", 100), Ok((90, 99)));
        assert_eq!(parse_range_header("bytes=-10", 100), Ok((90, 99)));
        assert_eq!(parse_range_header("bytes=-500", 100), Ok((0, 99)));
        assert_eq!(parse_range_header("bytes=50-500", 100), Ok((50, 99)));
        assert!(parse_range_header("bytes=100-", 100).is_err());
        assert!(parse_range_header("bytes=9-0", 100).is_err());
        assert!(parse_range_header("bytes=0-1,4-5", 100).is_err());
        assert!(parse_range_header("bytes=0-0", 0).is_err());
        assert!(parse_range_header("items=0-1", 100).is_err());
    }

    #[tokio::test]
    async fn test_scope_containment() {
        let d = dispatcher(S3CompatibilityConfig::default()).await;
        d.dispatch(put("team-b/x", b"b"), &admin()).await.unwrap();
        let team_a = AccessGrant::new("AKIDA", "a").with_scope_prefix("team-a/");

        let err = d.dispatch(get("team-b/x"), &team_a).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::AccessDenied);
        let err = d.dispatch(put("team-b/y", b"y"), &team_a).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::AccessDenied);
        let err = d.dispatch(list("", None), &team_a).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::AccessDenied);

        d.dispatch(put("team-a/x", b"a"), &team_a).await.unwrap();
        assert!(matches!(
            d.dispatch(get("team-a/x"), &team_a).await.unwrap(),
            S3Output::Object { .. }
        ));
        assert!(d.dispatch(list("team-a/", None), &team_a).await.is_ok());

        let err = d
            .dispatch(S3Operation::CreateBucket { bucket: "new-bucket".into() }, &team_a)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::AccessDenied);
    }

    #[tokio::test]
    async fn test_read_only_grant() {
        let d = dispatcher(S3CompatibilityConfig::default()).await;
        let reader = AccessGrant::new("AKIDR", "r").with_permissions(Permissions {
            read: true,
            list: true,
            write: false,
            delete: false,
        });
        assert!(d.dispatch(list("", None), &reader).await.is_ok());
        let err = d.dispatch(put("x", b"x"), &reader).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::AccessDenied);
    }

    #[tokio::test]
    async fn test_max_keys_clamped() {
        let d = dispatcher(S3CompatibilityConfig {
            max_keys_limit: 3,
            ..Default::default()
        })
        .await;
        for k in ["a", "b", "c", "d", "e"] {
            d.dispatch(put(k, b"x"), &admin()).await.unwrap();
        }

        let S3Output::ObjectList(listing) = d.dispatch(list("", Some(1000)), &admin()).await.unwrap()
        else {
            panic!("not a listing");
        };
        assert_eq!(listing.max_keys, 3);
        assert_eq!(listing.page.entries.len(), 3);
        assert!(listing.page.is_truncated);
    }

    #[tokio::test]
    async fn test_conditional_and_range_get() {
        let d = dispatcher(S3CompatibilityConfig::default()).await;
        d.dispatch(put("doc", b"0123456789"), &admin()).await.unwrap();
        let etag = md5_hex(b"0123456789");

        let mut req = GetObjectRequest {
            key: key("doc"),
            range: Some("bytes=2-4".to_string()),
            conditions: Conditions::default(),
        };
        match d.dispatch(S3Operation::GetObject(req.clone()), &admin()).await.unwrap() {
            S3Output::Object { body, range, .. } => {
                assert_eq!(body, Bytes::from_static(b"234"));
                assert_eq!(range, Some((2, 4)));
            }
            other => panic!("unexpected {:?}", other),
        }

        req.range = Some("bytes=10-".to_string());
        let err = d.dispatch(S3Operation::GetObject(req.clone()), &admin()).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::InvalidRange);

        req.range = None;
        req.conditions.if_none_match = Some(format!("\"{}\"", etag));
        assert!(matches!(
            d.dispatch(S3Operation::GetObject(req.clone()), &admin()).await.unwrap(),
            S3Output::NotModified { .. }
        ));

        req.conditions = Conditions {
            if_match: Some("\"nope\"".to_string()),
            ..Default::default()
        };
        let err = d.dispatch(S3Operation::GetObject(req.clone()), &admin()).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::PreconditionFailed);

        req.conditions = Conditions {
            if_modified_since: Some(chrono::Utc::now() + Duration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(
            d.dispatch(S3Operation::HeadObject(req), &admin()).await.unwrap(),
            S3Output::NotModified { .. }
        ));
    }

    /// Replaces the object right after answering `head`
    struct OverwriteAfterHead {
        inner: Arc<dyn ObjectStore>,
        replacement: Bytes,
    }

    #[async_trait::async_trait]
    impl ObjectStore for OverwriteAfterHead {
        async fn create_bucket(&self, bucket: &str) -> s3link_core::Result<s3link_core::BucketInfo> {
            self.inner.create_bucket(bucket).await
        }
        async fn delete_bucket(&self, bucket: &str) -> s3link_core::Result<()> {
            self.inner.delete_bucket(bucket).await
        }
        async fn head_bucket(&self, bucket: &str) -> s3link_core::Result<s3link_core::BucketInfo> {
            self.inner.head_bucket(bucket).await
        }
        async fn list_buckets(&self) -> s3link_core::Result<Vec<s3link_core::BucketInfo>> {
            self.inner.list_buckets().await
        }
        async fn get(&self, key: &ObjectKey) -> s3link_core::Result<(Bytes, ObjectMetadata)> {
            self.inner.get(key).await
        }
        async fn get_range(
            &self,
            key: &ObjectKey,
            range: std::ops::Range<u64>,
        ) -> s3link_core::Result<(Bytes, ObjectMetadata)> {
            self.inner.get_range(key, range).await
        }
        async fn head(&self, key: &ObjectKey) -> s3link_core::Result<ObjectMetadata> {
            let metadata = self.inner.head(key).await?;
            self.inner
                .put(key, self.replacement.clone(), PutOptions::default())
                .await?;
            Ok(metadata)
        }
        async fn put(
            &self,
            key: &ObjectKey,
            data: Bytes,
            options: PutOptions,
        ) -> s3link_core::Result<ObjectMetadata> {
            self.inner.put(key, data, options).await
        }
        async fn copy(
            &self,
            source: &ObjectKey,
            dest: &ObjectKey,
            options: Option<PutOptions>,
        ) -> s3link_core::Result<ObjectMetadata> {
            self.inner.copy(source, dest, options).await
        }
        async fn delete(&self, key: &ObjectKey) -> s3link_core::Result<()> {
            self.inner.delete(key).await
        }
        async fn list(&self, bucket: &str, query: &ListQuery) -> s3link_core::Result<s3link_core::ListPage> {
            self.inner.list(bucket, query).await
        }
        async fn put_part(
            &self,
            key: &ObjectKey,
            part_number: u32,
            data: Bytes,
        ) -> s3link_core::Result<s3link_core::PartRecord> {
            self.inner.put_part(key, part_number, data).await
        }
        async fn commit_parts(
            &self,
            key: &ObjectKey,
            parts: &[s3link_core::PartRecord],
            options: PutOptions,
        ) -> s3link_core::Result<ObjectMetadata> {
            self.inner.commit_parts(key, parts, options).await
        }
        async fn discard_parts(&self, parts: &[s3link_core::PartRecord]) -> s3link_core::Result<()> {
            self.inner.discard_parts(parts).await
        }
    }

    #[tokio::test]
    async fn test_get_describes_version_read() {
        let inner = BlockObjectStore::new(Arc::new(MemoryBlockStore::new()), StoreConfig::default())
            .unwrap();
        inner.create_bucket("shared").await.unwrap();
        let inner: Arc<dyn ObjectStore> = Arc::new(inner);
        inner
            .put(&key("doc"), Bytes::from_static(b"0123456789"), PutOptions::default())
            .await
            .unwrap();
        let d = Dispatcher::new(
            Arc::new(OverwriteAfterHead {
                inner: inner.clone(),
                replacement: Bytes::from_static(b"abcdef"),
            }),
            Arc::new(MultipartManager::new(3600, 5)),
            S3CompatibilityConfig::default(),
            "us-east-1",
        );

        let req = GetObjectRequest {
            key: key("doc"),
            range: Some("bytes=4-8".to_string()),
            conditions: Conditions::default(),
        };
        match d.dispatch(S3Operation::GetObject(req), &admin()).await.unwrap() {
            S3Output::Object {
                metadata,
                body,
                range,
            } => {
                assert_eq!(body, Bytes::from_static(b"ef"));
                assert_eq!(range, Some((4, 5)));
                assert_eq!(metadata.size, 6);
                assert_eq!(metadata.etag, md5_hex(b"abcdef"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // the replacement is shorter than the requested start
        let original = Bytes::from_static(b"0123456789");
        inner
            .put(&key("doc"), original.clone(), PutOptions::default())
            .await
            .unwrap();
        let req = GetObjectRequest {
            key: key("doc"),
            range: Some("bytes=7-".to_string()),
            conditions: Conditions::default(),
        };
        let err = d.dispatch(S3Operation::GetObject(req), &admin()).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::InvalidRange);

        inner
            .put(&key("doc"), original, PutOptions::default())
            .await
            .unwrap();
        match d.dispatch(get("doc"), &admin()).await.unwrap() {
            S3Output::Object { metadata, body, .. } => {
                assert_eq!(body, Bytes::from_static(b"abcdef"));
                assert_eq!(metadata.size, 6);
                assert_eq!(metadata.etag, md5_hex(&body));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_content_md5() {
        let d = dispatcher(S3CompatibilityConfig::default()).await;
        let op = S3Operation::PutObject {
            key: key("checked"),
            body: Bytes::from_static(b"payload"),
            content_md5: Some(Md5::digest(b"different").to_vec()),
            options: PutOptions::default(),
        };
        let err = d.dispatch(op, &admin()).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::BadDigest);

        let op = S3Operation::PutObject {
            key: key("checked"),
            body: Bytes::from_static(b"payload"),
            content_md5: Some(Md5::digest(b"payload").to_vec()),
            options: PutOptions::default(),
        };
        assert!(d.dispatch(op, &admin()).await.is_ok());
    }

    #[tokio::test]
    async fn test_copy_and_delete() {
        let d = dispatcher(S3CompatibilityConfig::default()).await;
        d.dispatch(put("src", b"data"), &admin()).await.unwrap();

        let copy = |replace| S3Operation::CopyObject {
            source: key("src"),
            destination: key("dst"),
            replace,
        };
        assert!(matches!(
            d.dispatch(copy(None), &admin()).await.unwrap(),
            S3Output::Copied { .. }
        ));
        let err = d
            .dispatch(
                S3Operation::CopyObject {
                    source: key("src"),
                    destination: key("src"),
                    replace: None,
                },
                &admin(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::InvalidRequest);

        // deleting a missing key still succeeds
        for _ in 0..2 {
            assert!(matches!(
                d.dispatch(S3Operation::DeleteObject { key: key("dst") }, &admin())
                    .await
                    .unwrap(),
                S3Output::NoContent
            ));
        }

        let disabled = dispatcher(S3CompatibilityConfig {
            disable_copy_object: true,
            ..Default::default()
        })
        .await;
        disabled.dispatch(put("src", b"data"), &admin()).await.unwrap();
        let err = disabled.dispatch(copy(None), &admin()).await.unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::NotImplemented);
    }

    #[tokio::test]
    async fn test_delete_objects_reports_per_key() {
        let d = dispatcher(S3CompatibilityConfig::default()).await;
        d.dispatch(put("team-a/1", b"1"), &admin()).await.unwrap();
        d.dispatch(put("team-b/1", b"1"), &admin()).await.unwrap();
        let team_a = AccessGrant::new("AKIDA", "a").with_scope_prefix("team-a/");

        let S3Output::Deleted(result) = d
            .dispatch(
                S3Operation::DeleteObjects {
                    bucket: "shared".to_string(),
                    keys: vec!["team-a/1".into(), "team-a/missing".into(), "team-b/1".into()],
                    quiet: false,
                },
                &team_a,
            )
            .await
            .unwrap()
        else {
            panic!("not a delete result");
        };
        assert_eq!(result.deleted, vec!["team-a/1", "team-a/missing"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].key, "team-b/1");
        assert_eq!(result.errors[0].code, "AccessDenied");
    }

    #[tokio::test]
    async fn test_multipart_flow() {
        let d = dispatcher(S3CompatibilityConfig::default()).await;
        let S3Output::UploadInitiated { upload_id, .. } = d
            .dispatch(
                S3Operation::InitiateMultipartUpload {
                    key: key("big"),
                    options: PutOptions::default(),
                },
                &admin(),
            )
            .await
            .unwrap()
        else {
            panic!("not initiated");
        };

        for (n, body) in [(1u32, &b"part-one"[..]), (2, &b"two"[..])] {
            d.dispatch(
                S3Operation::UploadPart {
                    key: key("big"),
                    upload_id: upload_id.clone(),
                    part_number: n,
                    body: Bytes::copy_from_slice(body),
                    content_md5: None,
                },
                &admin(),
            )
            .await
            .unwrap();
        }

        let complete = S3Operation::CompleteMultipartUpload {
            key: key("big"),
            upload_id: upload_id.clone(),
            parts: vec![
                CompletedPart { part_number: 1, etag: md5_hex(b"part-one") },
                CompletedPart { part_number: 2, etag: md5_hex(b"two") },
            ],
        };
        assert!(matches!(
            d.dispatch(complete, &admin()).await.unwrap(),
            S3Output::UploadCompleted { .. }
        ));

        match d.dispatch(get("big"), &admin()).await.unwrap() {
            S3Output::Object { body, .. } => assert_eq!(body, Bytes::from_static(b"part-onetwo")),
            other => panic!("unexpected {:?}", other),
        }

        // unknown bucket
        let err = d
            .dispatch(
                S3Operation::InitiateMultipartUpload {
                    key: ObjectKey::new("missing", "k").unwrap(),
                    options: PutOptions::default(),
                },
                &admin(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::NoSuchBucket);
    }
}
