//! CID (Content Identifier) utilities
//!
//! Creates content-addressed identifiers using BLAKE3

use cid::{Cid, Version};
use multihash_codetable::{Code, MultihashDigest};

/// Supported IPLD codecs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CidCodec {
    /// Raw binary data (0x55)
    #[default]
    Raw,
    /// DAG-CBOR (0x71)
    DagCbor,
}

impl CidCodec {
    /// Get the multicodec code
    pub fn code(&self) -> u64 {
        match self {
            CidCodec::Raw => 0x55,
            CidCodec::DagCbor => 0x71,
        }
    }

    /// Parse from multicodec code
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x55 => Some(CidCodec::Raw),
            0x71 => Some(CidCodec::DagCbor),
            _ => None,
        }
    }
}

/// Create a CIDv1 from data with a BLAKE3-256 multihash
///
/// Matches what an IPFS node returns for `block/put?cid-codec=raw&mhtype=blake3`.
pub fn create_cid(data: &[u8], codec: CidCodec) -> Cid {
    let multihash = Code::Blake3_256.digest(data);
    Cid::new_v1(codec.code(), multihash)
}

/// Verify that data matches a CID
pub fn verify_cid(data: &[u8], cid: &Cid) -> bool {
    if cid.version() != Version::V1 {
        return false;
    }
    match CidCodec::from_code(cid.codec()) {
        Some(codec) => create_cid(data, codec) == *cid,
        None => false,
    }
}

/// Parse a CID from a string
pub fn parse_cid(s: &str) -> Result<Cid, crate::BlockStoreError> {
    s.parse()
        .map_err(|e: cid::Error| crate::BlockStoreError::InvalidCid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_cid() {
        let cid = create_cid(b"Hello, World!", CidCodec::Raw);

        assert_eq!(cid.version(), Version::V1);
        assert_eq!(cid.codec(), CidCodec::Raw.code());
        assert_eq!(cid.hash().code(), 0x1e);
    }

    #[test]
    fn test_cid_consistency() {
        let cid1 = create_cid(b"test data", CidCodec::Raw);
        let cid2 = create_cid(b"test data", CidCodec::Raw);

        assert_eq!(cid1, cid2);
        assert_ne!(cid1, create_cid(b"other data", CidCodec::Raw));
    }

    #[test]
    fn test_verify_cid() {
        let cid = create_cid(b"verify me", CidCodec::Raw);

        assert!(verify_cid(b"verify me", &cid));
        assert!(!verify_cid(b"tampered", &cid));
    }

    #[test]
    fn test_parse_cid_roundtrip() {
        let cid = create_cid(b"parse me", CidCodec::Raw);
        let parsed = parse_cid(&cid.to_string()).unwrap();

        assert_eq!(cid, parsed);
        assert!(parse_cid("not-a-cid").is_err());
    }
}
