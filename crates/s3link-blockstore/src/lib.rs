//! # s3link Blockstore
//!
//! Content-addressed block storage layer underneath the s3link gateway.
//!
//! This crate provides:
//! - **Block operations**: Put, get, and delete content-addressed blocks
//! - **Chunking**: Split object payloads into fixed-size blocks
//! - **CID generation**: CIDv1 identifiers with a BLAKE3 multihash
//! - **Backends**: An IPFS HTTP API client and an in-memory store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          ObjectStore (s3link-core)      │
//! ├─────────────────────────────────────────┤
//! │           BlockStore Trait              │
//! ├────────────────────┬────────────────────┤
//! │   IpfsBlockStore   │  MemoryBlockStore  │
//! ├────────────────────┴────────────────────┤
//! │                 IPFS                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use s3link_blockstore::{BlockStore, MemoryBlockStore};
//!
//! let store = MemoryBlockStore::new();
//! let cid = store.put_block(b"hello").await?;
//! let data = store.get_block(&cid).await?;
//! ```

pub mod block;
pub mod chunker;
pub mod cid_utils;
pub mod error;
pub mod flexible;
pub mod ipfs;
pub mod memory;

pub use block::Block;
pub use chunker::{ChunkResult, Chunker, ChunkerConfig};
pub use cid_utils::{create_cid, CidCodec};
pub use error::{BlockStoreError, Result};
pub use flexible::FlexibleBlockStore;
pub use ipfs::{IpfsBlockStore, IpfsConfig};
pub use memory::MemoryBlockStore;

pub use cid::Cid;

use async_trait::async_trait;
use bytes::Bytes;

/// Default chunk size (256 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Maximum block size (1 MB)
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Trait for block storage backends
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store a block and return its CID
    async fn put_block(&self, data: &[u8]) -> Result<Cid>;

    /// Retrieve a block by CID
    async fn get_block(&self, cid: &Cid) -> Result<Bytes>;

    /// Check if a block exists
    async fn has_block(&self, cid: &Cid) -> Result<bool>;

    /// Delete a block
    async fn delete_block(&self, cid: &Cid) -> Result<()>;

    /// Get block size without retrieving content
    async fn block_size(&self, cid: &Cid) -> Result<u64>;

    /// Whether stored blocks survive a process restart
    fn is_persistent(&self) -> bool {
        false
    }
}
