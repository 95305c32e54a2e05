//! Backend store client
//!
//! [`ObjectStore`] is the narrow interface the gateway talks to.
//! [`BlockObjectStore`] implements it on top of any [`BlockStore`]: bodies
//! are chunked into content-addressed blocks, and a per-bucket sorted index
//! maps keys to block lists. Blocks are reference counted so identical
//! content is stored once and multipart completion can reuse part blocks
//! as-is; unreferenced blocks are removed by [`ObjectStore::collect_garbage`].

use crate::bucket::BucketIndex;
use crate::error::{BackendError, RejectionKind, Result};
use crate::listing::{ListPage, ListQuery};
use crate::metadata::{
    md5_hex, multipart_etag, BlockRef, BucketInfo, ObjectKey, ObjectMetadata, PartRecord,
    PutOptions,
};
use crate::pool::ConnectionPool;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use cid::Cid;
use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use s3link_blockstore::{BlockStore, Chunker, ChunkerConfig, DEFAULT_CHUNK_SIZE};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Object storage addressed by bucket and key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_bucket(&self, bucket: &str) -> Result<BucketInfo>;

    /// Fails with `BucketNotEmpty` while objects remain
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo>;

    /// All buckets sorted by name
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// Object body and metadata
    async fn get(&self, key: &ObjectKey) -> Result<(Bytes, ObjectMetadata)>;

    /// Part of an object body; `range` must lie within the object
    async fn get_range(
        &self,
        key: &ObjectKey,
        range: Range<u64>,
    ) -> Result<(Bytes, ObjectMetadata)> {
        let (data, metadata) = self.get(key).await?;
        let end = range.end.min(data.len() as u64) as usize;
        let start = (range.start as usize).min(end);
        Ok((data.slice(start..end), metadata))
    }

    async fn head(&self, key: &ObjectKey) -> Result<ObjectMetadata>;

    /// Store an object, replacing any existing one
    async fn put(&self, key: &ObjectKey, data: Bytes, options: PutOptions)
        -> Result<ObjectMetadata>;

    /// Copy an object; `options` replaces the source's attributes when given
    async fn copy(
        &self,
        source: &ObjectKey,
        dest: &ObjectKey,
        options: Option<PutOptions>,
    ) -> Result<ObjectMetadata>;

    /// Remove an object; `NotFound` if absent
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// One page of keys in a bucket
    async fn list(&self, bucket: &str, query: &ListQuery) -> Result<ListPage>;

    /// Store one multipart part; the part is not visible until committed
    async fn put_part(&self, key: &ObjectKey, part_number: u32, data: Bytes)
        -> Result<PartRecord>;

    /// Assemble previously stored parts, in the given order, into an object
    async fn commit_parts(
        &self,
        key: &ObjectKey,
        parts: &[PartRecord],
        options: PutOptions,
    ) -> Result<ObjectMetadata>;

    /// Drop parts that will never be committed
    async fn discard_parts(&self, parts: &[PartRecord]) -> Result<()>;

    /// Remove stored data nothing refers to any more; returns blocks removed
    async fn collect_garbage(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Settings for [`BlockObjectStore`]
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Block size used when chunking bodies
    pub chunk_size: usize,
    /// Concurrent backend calls
    pub max_connections: usize,
    /// Timeout for acquiring a connection and for each call
    pub dial_timeout: Duration,
    /// Index entries one list call may walk
    pub exhaustive_limit: usize,
    /// Total bytes of committed objects allowed
    pub quota_bytes: Option<u64>,
    /// Refuse every write
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_connections: 64,
            dial_timeout: Duration::from_secs(120),
            exhaustive_limit: crate::DEFAULT_EXHAUSTIVE_LIMIT,
            quota_bytes: None,
            read_only: false,
        }
    }
}

/// Reference counts for stored blocks
#[derive(Default)]
struct BlockRefs {
    counts: Mutex<HashMap<Cid, usize>>,
    orphans: Mutex<HashSet<Cid>>,
}

impl BlockRefs {
    fn retain(&self, blocks: &[BlockRef]) {
        let mut counts = self.counts.lock();
        let mut orphans = self.orphans.lock();
        for block in blocks {
            *counts.entry(block.cid).or_insert(0) += 1;
            orphans.remove(&block.cid);
        }
    }

    fn release(&self, blocks: &[BlockRef]) {
        let mut counts = self.counts.lock();
        let mut orphans = self.orphans.lock();
        for block in blocks {
            if let Some(count) = counts.get_mut(&block.cid) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(&block.cid);
                    orphans.insert(block.cid);
                }
            }
        }
    }

    fn take_orphans(&self) -> Vec<Cid> {
        let counts = self.counts.lock();
        let mut orphans = self.orphans.lock();
        orphans.drain().filter(|cid| !counts.contains_key(cid)).collect()
    }
}

/// Blocks retained on behalf of a write in progress; released on drop unless kept
struct Retained<'a> {
    refs: &'a BlockRefs,
    blocks: Vec<BlockRef>,
    armed: bool,
}

impl<'a> Retained<'a> {
    fn new(refs: &'a BlockRefs, blocks: Vec<BlockRef>) -> Self {
        refs.retain(&blocks);
        Self {
            refs,
            blocks,
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for Retained<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.refs.release(&self.blocks);
        }
    }
}

/// [`ObjectStore`] over a content-addressed block store
pub struct BlockObjectStore<S: BlockStore> {
    blocks: Arc<S>,
    chunker: Chunker,
    pool: ConnectionPool,
    buckets: RwLock<BTreeMap<String, BucketIndex>>,
    refs: BlockRefs,
    /// Writers hold it shared between retaining and storing blocks; garbage
    /// collection holds it exclusively.
    write_gate: tokio::sync::RwLock<()>,
    config: StoreConfig,
}

impl<S: BlockStore> BlockObjectStore<S> {
    /// Create a store over `blocks`
    pub fn new(blocks: Arc<S>, config: StoreConfig) -> Result<Self> {
        let chunker = Chunker::with_config(ChunkerConfig::with_chunk_size(config.chunk_size)?);
        let pool = ConnectionPool::new(config.max_connections, config.dial_timeout);
        Ok(Self {
            blocks,
            chunker,
            pool,
            buckets: RwLock::new(BTreeMap::new()),
            refs: BlockRefs::default(),
            write_gate: tokio::sync::RwLock::new(()),
            config,
        })
    }

    /// The connection pool backend calls run on
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn block_store(&self) -> &Arc<S> {
        &self.blocks
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn check_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(BackendError::Rejected {
                kind: RejectionKind::Permission,
                reason: "backend is read-only".to_string(),
            });
        }
        Ok(())
    }

    fn check_quota(&self, incoming: u64) -> Result<()> {
        let Some(quota) = self.config.quota_bytes else {
            return Ok(());
        };
        let used: u64 = self.buckets.read().values().map(|b| b.total_size()).sum();
        if used.saturating_add(incoming) > quota {
            return Err(BackendError::Rejected {
                kind: RejectionKind::Quota,
                reason: format!("storing {} bytes would exceed the {} byte quota", incoming, quota),
            });
        }
        Ok(())
    }

    fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.buckets.read().contains_key(bucket) {
            Ok(())
        } else {
            Err(BackendError::BucketNotFound(bucket.to_string()))
        }
    }

    fn lookup(&self, key: &ObjectKey) -> Result<ObjectMetadata> {
        let buckets = self.buckets.read();
        let index = buckets
            .get(&key.bucket)
            .ok_or_else(|| BackendError::BucketNotFound(key.bucket.clone()))?;
        index
            .get(&key.key)
            .cloned()
            .ok_or_else(|| BackendError::not_found(&key.bucket, &key.key))
    }

    fn index_insert(&self, key: &ObjectKey, metadata: ObjectMetadata) -> Result<()> {
        let replaced = {
            let mut buckets = self.buckets.write();
            let index = buckets
                .get_mut(&key.bucket)
                .ok_or_else(|| BackendError::BucketNotFound(key.bucket.clone()))?;
            index.insert(metadata)
        };
        if let Some(old) = replaced {
            self.refs.release(&old.blocks);
        }
        Ok(())
    }

    fn list_page(&self, bucket: &str, query: &ListQuery) -> Result<ListPage> {
        let buckets = self.buckets.read();
        let index = buckets
            .get(bucket)
            .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))?;
        index.list(query, self.config.exhaustive_limit)
    }

    /// Chunk and store a body; the caller must hold the write gate shared
    async fn write_blocks(&self, data: &Bytes) -> Result<Retained<'_>> {
        let chunks = self.chunker.chunk_bytes(data);
        let refs = chunks
            .chunks
            .iter()
            .map(|b| BlockRef {
                cid: b.cid,
                size: b.size() as u64,
            })
            .collect();
        let retained = Retained::new(&self.refs, refs);

        try_join_all(chunks.chunks.iter().map(|block| async move {
            let stored = self.blocks.put_block(&block.data).await?;
            if stored != block.cid {
                return Err(BackendError::Corrupted(format!(
                    "block store returned {} for block {}",
                    stored, block.cid
                )));
            }
            Ok::<(), BackendError>(())
        }))
        .await?;

        debug!(blocks = retained.blocks.len(), size = data.len(), "stored blocks");
        Ok(retained)
    }

    async fn read_blocks(&self, blocks: &[BlockRef]) -> Result<Bytes> {
        let parts = try_join_all(blocks.iter().map(|block| async move {
            let data = self.blocks.get_block(&block.cid).await?;
            if data.len() as u64 != block.size {
                return Err(BackendError::Corrupted(format!(
                    "block {} has {} bytes, expected {}",
                    block.cid,
                    data.len(),
                    block.size
                )));
            }
            Ok::<Bytes, BackendError>(data)
        }))
        .await?;
        Ok(Chunker::reassemble(parts))
    }
}

#[async_trait]
impl<S: BlockStore + 'static> ObjectStore for BlockObjectStore<S> {
    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        crate::bucket::validate_bucket_name(bucket)?;
        self.pool
            .run("create_bucket", async {
                self.check_writable()?;
                let mut buckets = self.buckets.write();
                if buckets.contains_key(bucket) {
                    return Err(BackendError::BucketAlreadyExists(bucket.to_string()));
                }
                let info = BucketInfo {
                    name: bucket.to_string(),
                    created_at: Utc::now(),
                };
                buckets.insert(bucket.to_string(), BucketIndex::new(info.clone()));
                Ok(info)
            })
            .await
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.pool
            .run("delete_bucket", async {
                self.check_writable()?;
                let mut buckets = self.buckets.write();
                match buckets.get(bucket) {
                    None => Err(BackendError::BucketNotFound(bucket.to_string())),
                    Some(index) if !index.is_empty() => {
                        Err(BackendError::BucketNotEmpty(bucket.to_string()))
                    }
                    Some(_) => {
                        buckets.remove(bucket);
                        Ok(())
                    }
                }
            })
            .await
    }

    async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        self.pool
            .run("head_bucket", async {
                self.buckets
                    .read()
                    .get(bucket)
                    .map(|index| index.info().clone())
                    .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))
            })
            .await
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.pool
            .run("list_buckets", async {
                Ok(self
                    .buckets
                    .read()
                    .values()
                    .map(|index| index.info().clone())
                    .collect())
            })
            .await
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &ObjectKey) -> Result<(Bytes, ObjectMetadata)> {
        self.pool
            .run("get", async {
                let _gate = self.write_gate.read().await;
                let metadata = self.lookup(key)?;
                let data = self.read_blocks(&metadata.blocks).await?;
                if data.len() as u64 != metadata.size {
                    return Err(BackendError::Corrupted(format!(
                        "{} has {} bytes, index says {}",
                        key,
                        data.len(),
                        metadata.size
                    )));
                }
                Ok((data, metadata))
            })
            .await
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get_range(
        &self,
        key: &ObjectKey,
        range: Range<u64>,
    ) -> Result<(Bytes, ObjectMetadata)> {
        self.pool
            .run("get_range", async {
                let _gate = self.write_gate.read().await;
                let metadata = self.lookup(key)?;
                let end = range.end.min(metadata.size);
                let start = range.start.min(end);

                // only fetch the blocks overlapping [start, end)
                let mut offset = 0u64;
                let mut first_offset = None;
                let mut wanted = Vec::new();
                for block in &metadata.blocks {
                    let block_end = offset + block.size;
                    if block_end > start && offset < end {
                        first_offset.get_or_insert(offset);
                        wanted.push(*block);
                    }
                    offset = block_end;
                }

                let data = self.read_blocks(&wanted).await?;
                let base = first_offset.unwrap_or(start);
                let from = (start - base) as usize;
                let to = ((end - base) as usize).min(data.len());
                Ok((data.slice(from.min(to)..to), metadata))
            })
            .await
    }

    async fn head(&self, key: &ObjectKey) -> Result<ObjectMetadata> {
        self.pool.run("head", async { self.lookup(key) }).await
    }

    #[instrument(skip(self, data, options), fields(key = %key, size = data.len()))]
    async fn put(
        &self,
        key: &ObjectKey,
        data: Bytes,
        options: PutOptions,
    ) -> Result<ObjectMetadata> {
        self.pool
            .run("put", async {
                self.check_writable()?;
                self.ensure_bucket(&key.bucket)?;
                self.check_quota(data.len() as u64)?;

                let _gate = self.write_gate.read().await;
                let retained = self.write_blocks(&data).await?;
                let metadata = ObjectMetadata {
                    key: key.key.clone(),
                    size: data.len() as u64,
                    etag: md5_hex(&data),
                    last_modified: Utc::now(),
                    content_type: options.content_type,
                    custom_metadata: options.custom_metadata,
                    blocks: retained.blocks.clone(),
                };
                self.index_insert(key, metadata.clone())?;
                retained.keep();
                Ok(metadata)
            })
            .await
    }

    #[instrument(skip(self, options), fields(source = %source, dest = %dest))]
    async fn copy(
        &self,
        source: &ObjectKey,
        dest: &ObjectKey,
        options: Option<PutOptions>,
    ) -> Result<ObjectMetadata> {
        self.pool
            .run("copy", async {
                self.check_writable()?;
                self.ensure_bucket(&dest.bucket)?;

                let _gate = self.write_gate.read().await;
                let original = self.lookup(source)?;
                self.check_quota(original.size)?;

                let retained = Retained::new(&self.refs, original.blocks.clone());
                let (content_type, custom_metadata) = match options {
                    Some(replace) => (replace.content_type, replace.custom_metadata),
                    None => (original.content_type, original.custom_metadata),
                };
                let metadata = ObjectMetadata {
                    key: dest.key.clone(),
                    size: original.size,
                    etag: original.etag,
                    last_modified: Utc::now(),
                    content_type,
                    custom_metadata,
                    blocks: original.blocks,
                };
                self.index_insert(dest, metadata.clone())?;
                retained.keep();
                Ok(metadata)
            })
            .await
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.pool
            .run("delete", async {
                self.check_writable()?;
                let removed = {
                    let mut buckets = self.buckets.write();
                    let index = buckets
                        .get_mut(&key.bucket)
                        .ok_or_else(|| BackendError::BucketNotFound(key.bucket.clone()))?;
                    index
                        .remove(&key.key)
                        .ok_or_else(|| BackendError::not_found(&key.bucket, &key.key))?
                };
                self.refs.release(&removed.blocks);
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, query: &ListQuery) -> Result<ListPage> {
        self.pool
            .run("list", async { self.list_page(bucket, query) })
            .await
    }

    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn put_part(
        &self,
        key: &ObjectKey,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartRecord> {
        self.pool
            .run("put_part", async {
                self.check_writable()?;
                self.ensure_bucket(&key.bucket)?;
                self.check_quota(data.len() as u64)?;

                let _gate = self.write_gate.read().await;
                let retained = self.write_blocks(&data).await?;
                let record = PartRecord {
                    part_number,
                    etag: md5_hex(&data),
                    size: data.len() as u64,
                    last_modified: Utc::now(),
                    blocks: retained.blocks.clone(),
                };
                // the part keeps its references until committed or discarded
                retained.keep();
                Ok(record)
            })
            .await
    }

    #[instrument(skip(self, parts, options), fields(key = %key, parts = parts.len()))]
    async fn commit_parts(
        &self,
        key: &ObjectKey,
        parts: &[PartRecord],
        options: PutOptions,
    ) -> Result<ObjectMetadata> {
        self.pool
            .run("commit_parts", async {
                self.check_writable()?;
                let metadata = ObjectMetadata {
                    key: key.key.clone(),
                    size: parts.iter().map(|p| p.size).sum(),
                    etag: multipart_etag(parts.iter().map(|p| p.etag.as_str())),
                    last_modified: Utc::now(),
                    content_type: options.content_type,
                    custom_metadata: options.custom_metadata,
                    blocks: parts.iter().flat_map(|p| p.blocks.iter().copied()).collect(),
                };
                // part references move to the object as-is
                self.index_insert(key, metadata.clone())?;
                Ok(metadata)
            })
            .await
    }

    async fn discard_parts(&self, parts: &[PartRecord]) -> Result<()> {
        for part in parts {
            self.refs.release(&part.blocks);
        }
        Ok(())
    }

    async fn collect_garbage(&self) -> Result<usize> {
        let _gate = self.write_gate.write().await;
        let mut removed = 0;
        for cid in self.refs.take_orphans() {
            let result = self
                .pool
                .run("delete_block", async {
                    self.blocks.delete_block(&cid).await.map_err(BackendError::from)
                })
                .await;
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(%cid, error = %e, "failed to remove unreferenced block"),
            }
        }
        if removed > 0 {
            debug!(removed, "collected unreferenced blocks");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3link_blockstore::{BlockStoreError, MemoryBlockStore};

    fn key(k: &str) -> ObjectKey {
        ObjectKey::new("bucket", k).unwrap()
    }

    async fn store_with(config: StoreConfig) -> (Arc<MemoryBlockStore>, BlockObjectStore<MemoryBlockStore>) {
        let blocks = Arc::new(MemoryBlockStore::new());
        let store = BlockObjectStore::new(blocks.clone(), config).unwrap();
        store.create_bucket("bucket").await.unwrap();
        (blocks, store)
    }

    async fn small_chunks() -> (Arc<MemoryBlockStore>, BlockObjectStore<MemoryBlockStore>) {
        store_with(StoreConfig {
            chunk_size: 4,
            ..Default::default()
        })
        .await
    }

    /// Block store that answers slowly or not at all
    struct UnreliableBlockStore {
        inner: MemoryBlockStore,
        delay: Duration,
        refuse: bool,
    }

    #[async_trait]
    impl BlockStore for UnreliableBlockStore {
        async fn put_block(&self, data: &[u8]) -> s3link_blockstore::Result<Cid> {
            tokio::time::sleep(self.delay).await;
            if self.refuse {
                return Err(BlockStoreError::Connection("connection refused".into()));
            }
            self.inner.put_block(data).await
        }

        async fn get_block(&self, cid: &Cid) -> s3link_blockstore::Result<Bytes> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_block(cid).await
        }

        async fn has_block(&self, cid: &Cid) -> s3link_blockstore::Result<bool> {
            self.inner.has_block(cid).await
        }

        async fn delete_block(&self, cid: &Cid) -> s3link_blockstore::Result<()> {
            self.inner.delete_block(cid).await
        }

        async fn block_size(&self, cid: &Cid) -> s3link_blockstore::Result<u64> {
            self.inner.block_size(cid).await
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_, store) = small_chunks().await;
        let mut options = PutOptions::default();
        options.content_type = Some("text/plain".into());
        options.custom_metadata.insert("owner".into(), "alice".into());

        let written = store
            .put(&key("docs/readme"), Bytes::from_static(b"hello world"), options)
            .await
            .unwrap();
        assert_eq!(written.size, 11);
        assert_eq!(written.etag, md5_hex(b"hello world"));
        assert_eq!(written.blocks.len(), 3);

        let (data, metadata) = store.get(&key("docs/readme")).await.unwrap();
        assert_eq!(data.as_ref(), b"hello world");
        assert_eq!(metadata.content_type.as_deref(), Some("text/plain"));
        assert_eq!(metadata.custom_metadata["owner"], "alice");
    }

    #[tokio::test]
    async fn test_literal_key_preserved() {
        let (_, store) = small_chunks().await;
        store
            .put(&key("a/../b"), Bytes::from_static(b"dots"), PutOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            store.head(&key("b")).await,
            Err(BackendError::NotFound { .. })
        ));
        let (data, _) = store.get(&key("a/../b")).await.unwrap();
        assert_eq!(data.as_ref(), b"dots");
    }

    #[tokio::test]
    async fn test_get_range_spans_blocks() {
        let (_, store) = small_chunks().await;
        store
            .put(&key("r"), Bytes::from_static(b"0123456789"), PutOptions::default())
            .await
            .unwrap();

        let (data, _) = store.get_range(&key("r"), 3..9).await.unwrap();
        assert_eq!(data.as_ref(), b"345678");

        let (data, _) = store.get_range(&key("r"), 8..10).await.unwrap();
        assert_eq!(data.as_ref(), b"89");
    }

    #[tokio::test]
    async fn test_missing_objects_and_buckets() {
        let (_, store) = small_chunks().await;

        assert!(matches!(
            store.get(&key("nope")).await,
            Err(BackendError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(&key("nope")).await,
            Err(BackendError::NotFound { .. })
        ));
        let other = ObjectKey::new("other", "k").unwrap();
        assert!(matches!(
            store.put(&other, Bytes::new(), PutOptions::default()).await,
            Err(BackendError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let (_, store) = small_chunks().await;

        assert!(matches!(
            store.create_bucket("bucket").await,
            Err(BackendError::BucketAlreadyExists(_))
        ));
        assert!(matches!(
            store.create_bucket("Bad_Name").await,
            Err(BackendError::InvalidBucketName(_))
        ));

        store
            .put(&key("x"), Bytes::from_static(b"x"), PutOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            store.delete_bucket("bucket").await,
            Err(BackendError::BucketNotEmpty(_))
        ));

        store.delete(&key("x")).await.unwrap();
        store.delete_bucket("bucket").await.unwrap();
        assert!(store.list_buckets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_and_gc_remove_old_blocks() {
        let (blocks, store) = small_chunks().await;
        store
            .put(&key("k"), Bytes::from_static(b"aaaabbbb"), PutOptions::default())
            .await
            .unwrap();
        assert_eq!(blocks.len(), 2);

        store
            .put(&key("k"), Bytes::from_static(b"cccc"), PutOptions::default())
            .await
            .unwrap();
        assert_eq!(store.collect_garbage().await.unwrap(), 2);
        assert_eq!(blocks.len(), 1);

        store.delete(&key("k")).await.unwrap();
        store.collect_garbage().await.unwrap();
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn test_shared_blocks_survive_until_last_reference() {
        let (blocks, store) = small_chunks().await;
        for k in ["one", "two"] {
            store
                .put(&key(k), Bytes::from_static(b"same"), PutOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(blocks.len(), 1);

        store.delete(&key("one")).await.unwrap();
        assert_eq!(store.collect_garbage().await.unwrap(), 0);
        assert_eq!(store.get(&key("two")).await.unwrap().0.as_ref(), b"same");

        store.delete(&key("two")).await.unwrap();
        assert_eq!(store.collect_garbage().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_copy_links_blocks_and_replaces_metadata() {
        let (blocks, store) = small_chunks().await;
        let mut options = PutOptions::default();
        options.custom_metadata.insert("v".into(), "1".into());
        store
            .put(&key("src"), Bytes::from_static(b"copy me!"), options)
            .await
            .unwrap();
        let stored = blocks.len();

        let kept = store.copy(&key("src"), &key("dst"), None).await.unwrap();
        assert_eq!(kept.custom_metadata["v"], "1");
        assert_eq!(blocks.len(), stored);

        let mut replace = PutOptions::default();
        replace.custom_metadata.insert("v".into(), "2".into());
        let replaced = store.copy(&key("src"), &key("dst2"), Some(replace)).await.unwrap();
        assert_eq!(replaced.custom_metadata["v"], "2");
        assert_eq!(replaced.etag, kept.etag);

        store.delete(&key("src")).await.unwrap();
        store.collect_garbage().await.unwrap();
        assert_eq!(store.get(&key("dst")).await.unwrap().0.as_ref(), b"copy me!");
    }

    #[tokio::test]
    async fn test_commit_parts_concatenates() {
        let (blocks, store) = small_chunks().await;
        let target = key("big");
        let one = store.put_part(&target, 1, Bytes::from_static(b"first-")).await.unwrap();
        let two = store.put_part(&target, 2, Bytes::from_static(b"second")).await.unwrap();
        assert!(matches!(store.head(&target).await, Err(BackendError::NotFound { .. })));

        let metadata = store
            .commit_parts(&target, &[one.clone(), two.clone()], PutOptions::default())
            .await
            .unwrap();
        assert_eq!(metadata.size, 12);
        assert_eq!(
            metadata.etag,
            multipart_etag([one.etag.as_str(), two.etag.as_str()])
        );
        assert!(metadata.is_multipart());
        assert_eq!(store.get(&target).await.unwrap().0.as_ref(), b"first-second");

        let stored = blocks.len();
        assert_eq!(store.collect_garbage().await.unwrap(), 0);
        assert_eq!(blocks.len(), stored);
    }

    #[tokio::test]
    async fn test_discarded_parts_are_collected() {
        let (blocks, store) = small_chunks().await;
        let part = store
            .put_part(&key("big"), 1, Bytes::from_static(b"abandoned"))
            .await
            .unwrap();
        assert!(!blocks.is_empty());

        store.discard_parts(&[part]).await.unwrap();
        store.collect_garbage().await.unwrap();
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn test_list_uses_exhaustive_limit() {
        let (_, store) = store_with(StoreConfig {
            exhaustive_limit: 2,
            ..Default::default()
        })
        .await;
        for k in ["a", "b", "c"] {
            store.put(&key(k), Bytes::new(), PutOptions::default()).await.unwrap();
        }

        let page = store.list("bucket", &ListQuery::default()).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.is_truncated);
    }

    #[tokio::test]
    async fn test_quota_and_read_only_reject() {
        let (_, store) = store_with(StoreConfig {
            quota_bytes: Some(8),
            ..Default::default()
        })
        .await;
        store
            .put(&key("a"), Bytes::from_static(b"12345"), PutOptions::default())
            .await
            .unwrap();
        let err = store
            .put(&key("b"), Bytes::from_static(b"12345"), PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Rejected {
                kind: RejectionKind::Quota,
                ..
            }
        ));
        assert!(!err.is_retryable());

        let blocks = Arc::new(MemoryBlockStore::new());
        let read_only = BlockObjectStore::new(
            blocks,
            StoreConfig {
                read_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            read_only.create_bucket("bucket").await,
            Err(BackendError::Rejected {
                kind: RejectionKind::Permission,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out_and_releases_connection() {
        let blocks = Arc::new(UnreliableBlockStore {
            inner: MemoryBlockStore::new(),
            delay: Duration::from_secs(5),
            refuse: false,
        });
        let store = BlockObjectStore::new(
            blocks,
            StoreConfig {
                dial_timeout: Duration::from_millis(50),
                max_connections: 1,
                ..Default::default()
            },
        )
        .unwrap();
        store.create_bucket("bucket").await.unwrap();

        let err = store
            .put(&key("slow"), Bytes::from_static(b"data"), PutOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.pool().available(), 1);
        assert!(matches!(store.head(&key("slow")).await, Err(BackendError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_transport_failure_is_unavailable() {
        let blocks = Arc::new(UnreliableBlockStore {
            inner: MemoryBlockStore::new(),
            delay: Duration::ZERO,
            refuse: true,
        });
        let store = BlockObjectStore::new(blocks, StoreConfig::default()).unwrap();
        store.create_bucket("bucket").await.unwrap();

        let err = store
            .put(&key("k"), Bytes::from_static(b"data"), PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
        assert_eq!(store.pool().available(), store.pool().size());
    }

    #[tokio::test]
    async fn test_concurrent_puts() {
        let (_, store) = small_chunks().await;
        let store = Arc::new(store);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let body = Bytes::from(format!("body-{i}"));
                    store
                        .put(&key(&format!("k{i:02}")), body, PutOptions::default())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let page = store.list("bucket", &ListQuery::default()).await.unwrap();
        assert_eq!(page.entries.len(), 16);
        assert_eq!(page.entries[0].key, "k00");
    }
}
