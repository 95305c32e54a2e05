//! Payload chunking
//!
//! Splits object bodies into fixed-size raw blocks before they are written
//! to a block store.

use crate::{Block, BlockStoreError, Result, DEFAULT_CHUNK_SIZE, MAX_BLOCK_SIZE};
use bytes::Bytes;

/// Configuration for the chunker
#[derive(Clone, Debug)]
pub struct ChunkerConfig {
    /// Size of each chunk in bytes
    pub chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkerConfig {
    /// Create with a custom chunk size
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_BLOCK_SIZE {
            return Err(BlockStoreError::Configuration(format!(
                "chunk size must be between 1 and {} bytes",
                MAX_BLOCK_SIZE
            )));
        }
        Ok(Self { chunk_size })
    }
}

/// Result of chunking a payload
#[derive(Clone, Debug)]
pub struct ChunkResult {
    /// The chunks produced, in payload order
    pub chunks: Vec<Block>,
    /// Total size of the original data
    pub total_size: u64,
}

impl ChunkResult {
    /// Get all CIDs in order
    pub fn cids(&self) -> Vec<cid::Cid> {
        self.chunks.iter().map(|c| c.cid).collect()
    }

    /// Number of chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Chunker for splitting data into blocks
#[derive(Clone, Debug, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom configuration
    pub fn with_config(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk a payload without copying it
    pub fn chunk_bytes(&self, data: &Bytes) -> ChunkResult {
        let mut chunks = Vec::with_capacity(calculate_chunk_count(
            data.len() as u64,
            self.config.chunk_size,
        ));
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.config.chunk_size).min(data.len());
            chunks.push(Block::from_data(data.slice(offset..end)));
            offset = end;
        }

        ChunkResult {
            chunks,
            total_size: data.len() as u64,
        }
    }

    /// Reassemble chunks back into data
    pub fn reassemble<I>(parts: I) -> Bytes
    where
        I: IntoIterator<Item = Bytes>,
    {
        let parts: Vec<Bytes> = parts.into_iter().collect();
        if parts.len() == 1 {
            return parts.into_iter().next().unwrap_or_default();
        }
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let mut result = Vec::with_capacity(total);
        for part in &parts {
            result.extend_from_slice(part);
        }
        Bytes::from(result)
    }

    /// Get the chunk size
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }
}

/// Calculate how many chunks will be needed for a given size
pub fn calculate_chunk_count(size: u64, chunk_size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    (size as usize).div_ceil(chunk_size)
}
