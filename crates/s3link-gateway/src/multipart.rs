//! Multipart upload management
//!
//! Each upload moves `Initiated → PartsUploading → Completed | Aborted`.
//! Mutating calls on one upload are serialized by a per-upload async mutex
//! held across the backend call. Terminal uploads stay behind as tombstones
//! until the sweeper drops them, so late calls see `NoSuchUpload`.

use crate::error::{ApiError, Result, S3ErrorCode};
use crate::operation::{CompletedPart, PartsListing, UploadSummary, UploadsListing};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use s3link_core::{ObjectKey, ObjectMetadata, ObjectStore, PartRecord, PutOptions};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Default page size for ListParts and ListMultipartUploads
pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// Lifecycle of one upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    PartsUploading,
    Completed,
    Aborted,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Mutable part of an upload, guarded by its mutex
#[derive(Debug)]
pub struct UploadProgress {
    pub state: UploadState,
    pub parts: BTreeMap<u32, PartRecord>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl UploadProgress {
    fn close(&mut self, state: UploadState) {
        self.state = state;
        self.parts.clear();
        self.closed_at = Some(Utc::now());
    }
}

/// Multipart upload state
#[derive(Debug)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub key: ObjectKey,
    /// Access key that initiated the upload
    pub owner: String,
    pub initiated_at: DateTime<Utc>,
    pub options: PutOptions,
    closed: AtomicBool,
    progress: Arc<Mutex<UploadProgress>>,
}

impl MultipartUpload {
    fn new(key: ObjectKey, options: PutOptions, owner: String) -> Self {
        Self {
            upload_id: Uuid::new_v4().simple().to_string(),
            key,
            owner,
            initiated_at: Utc::now(),
            options,
            closed: AtomicBool::new(false),
            progress: Arc::new(Mutex::new(UploadProgress {
                state: UploadState::Initiated,
                parts: BTreeMap::new(),
                closed_at: None,
            })),
        }
    }

    fn summary(&self) -> UploadSummary {
        UploadSummary {
            key: self.key.key.clone(),
            upload_id: self.upload_id.clone(),
            initiated_at: self.initiated_at,
            owner: self.owner.clone(),
        }
    }
}

fn no_such_upload(upload_id: &str) -> ApiError {
    ApiError::s3_with_resource(
        S3ErrorCode::NoSuchUpload,
        "The specified upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.",
        upload_id,
    )
}

fn invalid_part(message: String) -> ApiError {
    ApiError::s3(S3ErrorCode::InvalidPart, message)
}

/// Manager for multipart uploads
pub struct MultipartManager {
    uploads: DashMap<String, Arc<MultipartUpload>>,
    expiry: Duration,
    min_part_size: u64,
}

impl MultipartManager {
    /// Create a new manager
    pub fn new(expiry_secs: u64, min_part_size: u64) -> Self {
        Self {
            uploads: DashMap::new(),
            expiry: Duration::seconds(
                i64::try_from(expiry_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000),
            ),
            min_part_size,
        }
    }

    /// Start an upload and return its ID
    pub fn create(&self, key: ObjectKey, options: PutOptions, owner: impl Into<String>) -> String {
        let upload = MultipartUpload::new(key, options, owner.into());
        let upload_id = upload.upload_id.clone();
        tracing::debug!(upload_id = %upload_id, key = %upload.key, "Multipart upload initiated");
        self.uploads.insert(upload_id.clone(), Arc::new(upload));
        upload_id
    }

    /// Lock a live upload of `key`
    async fn lock(
        &self,
        key: &ObjectKey,
        upload_id: &str,
    ) -> Result<(Arc<MultipartUpload>, OwnedMutexGuard<UploadProgress>)> {
        let upload = self
            .uploads
            .get(upload_id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|upload| upload.key == *key)
            .ok_or_else(|| no_such_upload(upload_id))?;
        let progress = Arc::clone(&upload.progress).lock_owned().await;
        if progress.state.is_terminal() {
            return Err(no_such_upload(upload_id));
        }
        Ok((upload, progress))
    }

    /// Current state, including tombstones
    pub async fn state(&self, upload_id: &str) -> Option<UploadState> {
        let upload = self.uploads.get(upload_id).map(|e| Arc::clone(e.value()))?;
        let state = upload.progress.lock().await.state;
        Some(state)
    }

    /// Store one part; re-uploading a part number replaces it
    pub async fn upload_part(
        &self,
        store: &dyn ObjectStore,
        key: &ObjectKey,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<PartRecord> {
        let (_upload, mut progress) = self.lock(key, upload_id).await?;

        let record = store.put_part(key, part_number, body).await?;
        if let Some(replaced) = progress.parts.insert(part_number, record.clone()) {
            if let Err(e) = store.discard_parts(&[replaced]).await {
                tracing::warn!(upload_id, part_number, error = %e, "Failed to discard replaced part");
            }
        }
        progress.state = UploadState::PartsUploading;
        Ok(record)
    }

    /// Check the requested part list against what was uploaded
    fn select_parts(
        &self,
        progress: &UploadProgress,
        requested: &[CompletedPart],
    ) -> Result<Vec<PartRecord>> {
        if requested.is_empty() {
            return Err(ApiError::s3(
                S3ErrorCode::MalformedXML,
                "You must specify at least one part",
            ));
        }

        let mut selected = Vec::with_capacity(requested.len());
        for (index, part) in requested.iter().enumerate() {
            if index > 0 && part.part_number <= requested[index - 1].part_number {
                return Err(ApiError::s3(
                    S3ErrorCode::InvalidPartOrder,
                    format!(
                        "The list of parts was not in ascending order: part {} follows part {}",
                        part.part_number,
                        requested[index - 1].part_number
                    ),
                ));
            }
            let expected = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if part.part_number != expected {
                return Err(invalid_part(format!(
                    "part {} is missing; parts must be contiguous from 1",
                    expected
                )));
            }
            let record = progress.parts.get(&part.part_number).ok_or_else(|| {
                invalid_part(format!("part {} was never uploaded", part.part_number))
            })?;
            if !record.etag.eq_ignore_ascii_case(&part.etag) {
                return Err(invalid_part(format!(
                    "part {}: ETag {} does not match the uploaded part",
                    part.part_number, part.etag
                )));
            }
            let is_last = index + 1 == requested.len();
            if !is_last && record.size < self.min_part_size {
                return Err(ApiError::s3(
                    S3ErrorCode::EntityTooSmall,
                    format!(
                        "part {} is {} bytes, below the minimum allowed size of {} bytes",
                        part.part_number, record.size, self.min_part_size
                    ),
                ));
            }
            selected.push(record.clone());
        }
        Ok(selected)
    }

    /// Assemble the object. On any failure the upload keeps its parts and state.
    pub async fn complete(
        &self,
        store: &dyn ObjectStore,
        key: &ObjectKey,
        upload_id: &str,
        requested: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        let (upload, mut progress) = self.lock(key, upload_id).await?;
        let selected = self.select_parts(&progress, requested)?;

        let metadata = store
            .commit_parts(key, &selected, upload.options.clone())
            .await?;

        let unused: Vec<PartRecord> = progress
            .parts
            .iter()
            .filter(|(number, _)| !selected.iter().any(|p| p.part_number == **number))
            .map(|(_, record)| record.clone())
            .collect();
        if !unused.is_empty() {
            if let Err(e) = store.discard_parts(&unused).await {
                tracing::warn!(upload_id, error = %e, "Failed to discard unused parts");
            }
        }

        progress.close(UploadState::Completed);
        upload.closed.store(true, Ordering::Release);
        tracing::debug!(upload_id, key = %key, etag = %metadata.etag, "Multipart upload completed");
        Ok(metadata)
    }

    /// Abort an upload and release its parts
    pub async fn abort(&self, store: &dyn ObjectStore, key: &ObjectKey, upload_id: &str) -> Result<()> {
        let (upload, mut progress) = self.lock(key, upload_id).await?;
        let parts: Vec<PartRecord> = progress.parts.values().cloned().collect();
        store.discard_parts(&parts).await?;

        progress.close(UploadState::Aborted);
        upload.closed.store(true, Ordering::Release);
        tracing::debug!(upload_id, key = %key, "Multipart upload aborted");
        Ok(())
    }

    /// Parts after `marker`, at most `max_parts`
    pub async fn list_parts(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        marker: u32,
        max_parts: Option<usize>,
    ) -> Result<PartsListing> {
        let (upload, progress) = self.lock(key, upload_id).await?;
        let max_parts = max_parts.unwrap_or(DEFAULT_LIST_LIMIT).min(DEFAULT_LIST_LIMIT);

        let mut parts: Vec<PartRecord> = progress
            .parts
            .range(marker.saturating_add(1)..)
            .map(|(_, record)| record.clone())
            .take(max_parts + 1)
            .collect();
        let is_truncated = parts.len() > max_parts;
        parts.truncate(max_parts);

        Ok(PartsListing {
            key: key.clone(),
            upload_id: upload_id.to_string(),
            owner: upload.owner.clone(),
            part_number_marker: marker,
            max_parts,
            parts,
            is_truncated,
        })
    }

    /// Live uploads in `bucket` whose key starts with `prefix`, by key then start time
    pub fn list_uploads(&self, bucket: &str, prefix: &str, max_uploads: Option<usize>) -> UploadsListing {
        let max_uploads = max_uploads.unwrap_or(DEFAULT_LIST_LIMIT).min(DEFAULT_LIST_LIMIT);
        let mut uploads: Vec<UploadSummary> = self
            .uploads
            .iter()
            .filter(|entry| {
                let upload = entry.value();
                !upload.closed.load(Ordering::Acquire)
                    && upload.key.bucket == bucket
                    && upload.key.key.starts_with(prefix)
            })
            .map(|entry| entry.value().summary())
            .collect();
        uploads.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then(a.initiated_at.cmp(&b.initiated_at))
                .then(a.upload_id.cmp(&b.upload_id))
        });
        let is_truncated = uploads.len() > max_uploads;
        uploads.truncate(max_uploads);

        UploadsListing {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            max_uploads,
            uploads,
            is_truncated,
        }
    }

    /// Uploads not yet completed or aborted
    pub fn active_count(&self) -> usize {
        self.uploads
            .iter()
            .filter(|e| !e.value().closed.load(Ordering::Acquire))
            .count()
    }

    /// Abort uploads older than the expiry and drop old tombstones.
    /// Uploads busy with another call are left for the next sweep.
    pub async fn reap_expired(&self, store: &dyn ObjectStore, now: DateTime<Utc>) -> usize {
        let candidates: Vec<Arc<MultipartUpload>> = self
            .uploads
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut aborted = 0;
        for upload in candidates {
            let Ok(mut progress) = Arc::clone(&upload.progress).try_lock_owned() else {
                continue;
            };
            if let Some(closed_at) = progress.closed_at {
                if now - closed_at >= self.expiry {
                    self.uploads.remove(&upload.upload_id);
                }
                continue;
            }
            if now - upload.initiated_at < self.expiry {
                continue;
            }

            let parts: Vec<PartRecord> = progress.parts.values().cloned().collect();
            if let Err(e) = store.discard_parts(&parts).await {
                tracing::warn!(upload_id = %upload.upload_id, error = %e, "Failed to discard expired upload");
                continue;
            }
            progress.close(UploadState::Aborted);
            upload.closed.store(true, Ordering::Release);
            self.uploads.remove(&upload.upload_id);
            aborted += 1;
        }

        if aborted > 0 {
            tracing::info!(aborted, "Expired multipart uploads aborted");
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3link_blockstore::MemoryBlockStore;
    use s3link_core::{md5_hex, BlockObjectStore, StoreConfig};

    const MIN: u64 = 8;

    async fn setup() -> (BlockObjectStore<MemoryBlockStore>, MultipartManager, ObjectKey) {
        let store = BlockObjectStore::new(
            Arc::new(MemoryBlockStore::new()),
            StoreConfig {
                chunk_size: 4,
                ..Default::default()
            },
        )
        .unwrap();
        store.create_bucket("uploads").await.unwrap();
        let key = ObjectKey::new("uploads", "big.bin").unwrap();
        (store, MultipartManager::new(3600, MIN), key)
    }

    fn part(n: u32, data: &[u8]) -> CompletedPart {
        CompletedPart {
            part_number: n,
            etag: md5_hex(data),
        }
    }

    #[tokio::test]
    async fn test_complete_assembles_parts() {
        let (store, manager, key) = setup().await;
        let id = manager.create(key.clone(), PutOptions::default(), "AKID");
        assert_eq!(manager.state(&id).await, Some(UploadState::Initiated));

        manager.upload_part(&store, &key, &id, 1, Bytes::from_static(b"first---")).await.unwrap();
        manager.upload_part(&store, &key, &id, 2, Bytes::from_static(b"end")).await.unwrap();
        assert_eq!(manager.state(&id).await, Some(UploadState::PartsUploading));

        let metadata = manager
            .complete(&store, &key, &id, &[part(1, b"first---"), part(2, b"end")])
            .await
            .unwrap();
        assert!(metadata.etag.ends_with("-2"));
        assert_eq!(store.get(&key).await.unwrap().0, Bytes::from_static(b"first---end"));
        assert_eq!(manager.state(&id).await, Some(UploadState::Completed));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_etag_mismatch_keeps_upload_open() {
        let (store, manager, key) = setup().await;
        let id = manager.create(key.clone(), PutOptions::default(), "AKID");
        manager.upload_part(&store, &key, &id, 1, Bytes::from_static(b"12345678")).await.unwrap();
        manager.upload_part(&store, &key, &id, 2, Bytes::from_static(b"tail")).await.unwrap();

        let err = manager
            .complete(&store, &key, &id, &[part(1, b"12345678"), part(2, b"other")])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::InvalidPart);
        assert!(err.to_string().contains("part 2"));
        assert_eq!(manager.state(&id).await, Some(UploadState::PartsUploading));
        assert!(store.get(&key).await.is_err());

        // a corrected list still completes
        manager
            .complete(&store, &key, &id, &[part(1, b"12345678"), part(2, b"tail")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_order_gaps_and_sizes() {
        let (store, manager, key) = setup().await;
        let id = manager.create(key.clone(), PutOptions::default(), "AKID");
        for (n, data) in [(1, &b"tiny"[..]), (2, &b"12345678"[..]), (3, &b"x"[..])] {
            manager.upload_part(&store, &key, &id, n, Bytes::copy_from_slice(data)).await.unwrap();
        }

        let err = manager
            .complete(&store, &key, &id, &[part(2, b"12345678"), part(1, b"tiny")])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::InvalidPartOrder);

        let err = manager
            .complete(&store, &key, &id, &[part(2, b"12345678"), part(3, b"x")])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::InvalidPart);

        // part 1 is below the minimum and not last
        let err = manager
            .complete(&store, &key, &id, &[part(1, b"tiny"), part(2, b"12345678")])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::EntityTooSmall);
        assert!(err.to_string().contains("part 1"));

        // a single small part is the terminal part
        let (store, manager, key) = setup().await;
        let id = manager.create(key.clone(), PutOptions::default(), "AKID");
        manager.upload_part(&store, &key, &id, 1, Bytes::from_static(b"tiny")).await.unwrap();
        manager.complete(&store, &key, &id, &[part(1, b"tiny")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminal_states_reject_everything() {
        let (store, manager, key) = setup().await;
        let id = manager.create(key.clone(), PutOptions::default(), "AKID");
        manager.upload_part(&store, &key, &id, 1, Bytes::from_static(b"data")).await.unwrap();
        manager.abort(&store, &key, &id).await.unwrap();
        assert_eq!(manager.state(&id).await, Some(UploadState::Aborted));

        let err = manager
            .upload_part(&store, &key, &id, 2, Bytes::from_static(b"late"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::NoSuchUpload);
        assert_eq!(
            manager.complete(&store, &key, &id, &[part(1, b"data")]).await.unwrap_err().error_code(),
            S3ErrorCode::NoSuchUpload
        );
        assert_eq!(
            manager.abort(&store, &key, &id).await.unwrap_err().error_code(),
            S3ErrorCode::NoSuchUpload
        );
        assert!(manager.list_parts(&key, &id, 0, None).await.is_err());

        // parts were released
        assert_eq!(store.collect_garbage().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upload_id_bound_to_key() {
        let (store, manager, key) = setup().await;
        let id = manager.create(key.clone(), PutOptions::default(), "AKID");
        let other = ObjectKey::new("uploads", "other.bin").unwrap();
        let err = manager
            .upload_part(&store, &other, &id, 1, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), S3ErrorCode::NoSuchUpload);
    }

    #[tokio::test]
    async fn test_list_parts_and_uploads() {
        let (store, manager, key) = setup().await;
        let id = manager.create(key.clone(), PutOptions::default(), "AKID");
        for n in 1..=3 {
            manager.upload_part(&store, &key, &id, n, Bytes::from(vec![n as u8; 8])).await.unwrap();
        }

        let page = manager.list_parts(&key, &id, 0, Some(2)).await.unwrap();
        assert_eq!(page.parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);
        assert!(page.is_truncated);
        assert_eq!(page.next_part_number_marker(), Some(2));
        let rest = manager.list_parts(&key, &id, 2, Some(2)).await.unwrap();
        assert_eq!(rest.parts.len(), 1);
        assert!(!rest.is_truncated);

        manager.create(ObjectKey::new("uploads", "a/x").unwrap(), PutOptions::default(), "AKID");
        let all = manager.list_uploads("uploads", "", None);
        assert_eq!(all.uploads.iter().map(|u| u.key.as_str()).collect::<Vec<_>>(), vec!["a/x", "big.bin"]);
        assert_eq!(manager.list_uploads("uploads", "a/", None).uploads.len(), 1);
        assert!(manager.list_uploads("elsewhere", "", None).uploads.is_empty());
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let (store, manager, key) = setup().await;
        let stale = manager.create(key.clone(), PutOptions::default(), "AKID");
        manager.upload_part(&store, &key, &stale, 1, Bytes::from_static(b"orphan")).await.unwrap();

        assert_eq!(manager.reap_expired(&store, Utc::now()).await, 0);
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(manager.reap_expired(&store, later).await, 1);
        assert_eq!(manager.state(&stale).await, None);
        assert_eq!(store.collect_garbage().await.unwrap(), 2);
    }
}
