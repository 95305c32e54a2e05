//! Runtime-selected block store

use crate::{BlockStore, IpfsBlockStore, MemoryBlockStore, Result};
use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;

/// Either an IPFS node or process memory, chosen from configuration
#[derive(Clone)]
pub enum FlexibleBlockStore {
    Memory(MemoryBlockStore),
    Ipfs(IpfsBlockStore),
}

impl FlexibleBlockStore {
    /// Short backend name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Ipfs(_) => "ipfs",
        }
    }
}

#[async_trait]
impl BlockStore for FlexibleBlockStore {
    async fn put_block(&self, data: &[u8]) -> Result<Cid> {
        match self {
            Self::Memory(s) => s.put_block(data).await,
            Self::Ipfs(s) => s.put_block(data).await,
        }
    }

    async fn get_block(&self, cid: &Cid) -> Result<Bytes> {
        match self {
            Self::Memory(s) => s.get_block(cid).await,
            Self::Ipfs(s) => s.get_block(cid).await,
        }
    }

    async fn has_block(&self, cid: &Cid) -> Result<bool> {
        match self {
            Self::Memory(s) => s.has_block(cid).await,
            Self::Ipfs(s) => s.has_block(cid).await,
        }
    }

    async fn delete_block(&self, cid: &Cid) -> Result<()> {
        match self {
            Self::Memory(s) => s.delete_block(cid).await,
            Self::Ipfs(s) => s.delete_block(cid).await,
        }
    }

    async fn block_size(&self, cid: &Cid) -> Result<u64> {
        match self {
            Self::Memory(s) => s.block_size(cid).await,
            Self::Ipfs(s) => s.block_size(cid).await,
        }
    }

    fn is_persistent(&self) -> bool {
        match self {
            Self::Memory(s) => s.is_persistent(),
            Self::Ipfs(s) => s.is_persistent(),
        }
    }
}
