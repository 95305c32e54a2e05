//! Block types

use bytes::Bytes;
use cid::Cid;

/// A block of data with its CID
#[derive(Clone, Debug)]
pub struct Block {
    /// The content identifier
    pub cid: Cid,
    /// The raw data
    pub data: Bytes,
}

impl Block {
    /// Create a block from raw bytes (computes CID)
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let cid = crate::cid_utils::create_cid(&data, crate::cid_utils::CidCodec::Raw);
        Self { cid, data }
    }

    /// Get the size of the block
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if the block is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
