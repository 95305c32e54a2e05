//! IPFS HTTP API client for block operations

use crate::{BlockStore, BlockStoreError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use reqwest::{multipart, Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// Configuration for IPFS connection
#[derive(Clone, Debug)]
pub struct IpfsConfig {
    /// IPFS API URL (e.g., "http://localhost:5001")
    pub api_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Time allowed to establish a TCP connection
    pub connect_timeout: Duration,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5001".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(120),
        }
    }
}

impl IpfsConfig {
    /// Create with a custom API URL
    pub fn with_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }
}

/// IPFS block store client
#[derive(Clone)]
pub struct IpfsBlockStore {
    client: Client,
    config: IpfsConfig,
}

impl IpfsBlockStore {
    /// Build a client without contacting the node
    pub fn new(config: IpfsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("s3link/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BlockStoreError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Build a client and verify the node answers
    pub async fn connect(config: IpfsConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.verify_connection().await?;
        Ok(store)
    }

    /// Verify connection to IPFS
    pub async fn verify_connection(&self) -> Result<()> {
        let url = format!("{}/api/v0/id", self.config.api_url);
        self.client
            .post(&url)
            .send()
            .await
            .map_err(|e| BlockStoreError::Connection(format!("failed to connect to IPFS: {}", e)))?;
        Ok(())
    }

    fn map_send_error(&self, err: reqwest::Error) -> BlockStoreError {
        if err.is_timeout() {
            BlockStoreError::Timeout {
                seconds: self.config.timeout.as_secs(),
            }
        } else {
            err.into()
        }
    }

    async fn post(&self, url: &str) -> Result<Response> {
        self.client
            .post(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))
    }

    /// Turn a non-success reply into an error, recognising kubo's "not found" answers
    async fn check(&self, response: Response, cid: Option<&Cid>, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if let Some(cid) = cid {
            if status.as_u16() == 404 || body.contains("not found") {
                return Err(BlockStoreError::NotFound(*cid));
            }
        }
        if status.is_server_error() && body.is_empty() {
            return Err(BlockStoreError::Http(format!("{} failed: {}", action, status)));
        }
        Err(BlockStoreError::IpfsApi(format!("{} failed: {}", action, body)))
    }

    /// Get block by CID
    #[instrument(skip(self))]
    pub async fn get_block_raw(&self, cid: &Cid) -> Result<Bytes> {
        let url = format!("{}/api/v0/block/get?arg={}", self.config.api_url, cid);
        let response = self.post(&url).await?;
        let response = self.check(response, Some(cid), "block/get").await?;

        response.bytes().await.map_err(|e| self.map_send_error(e))
    }

    /// Put a raw block
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put_block_raw(&self, data: &[u8]) -> Result<Cid> {
        let url = format!(
            "{}/api/v0/block/put?cid-codec=raw&mhtype=blake3",
            self.config.api_url,
        );

        let part = multipart::Part::bytes(data.to_vec())
            .file_name("data")
            .mime_str("application/octet-stream")
            .map_err(|e| BlockStoreError::IpfsApi(e.to_string()))?;
        let form = multipart::Form::new().part("data", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = self.check(response, None, "block/put").await?;

        let result: BlockPutResponse = response
            .json()
            .await
            .map_err(|e| BlockStoreError::IpfsApi(e.to_string()))?;

        result
            .key
            .parse()
            .map_err(|e: cid::Error| BlockStoreError::InvalidCid(e.to_string()))
    }

    /// Get block stat (size)
    pub async fn block_stat(&self, cid: &Cid) -> Result<BlockStat> {
        let url = format!("{}/api/v0/block/stat?arg={}", self.config.api_url, cid);
        let response = self.post(&url).await?;
        let response = self.check(response, Some(cid), "block/stat").await?;

        response
            .json()
            .await
            .map_err(|e| BlockStoreError::IpfsApi(e.to_string()))
    }

    /// Remove a block
    pub async fn remove_block(&self, cid: &Cid) -> Result<()> {
        let url = format!("{}/api/v0/block/rm?arg={}", self.config.api_url, cid);
        let response = self.post(&url).await?;
        match self.check(response, Some(cid), "block/rm").await {
            Ok(_) | Err(BlockStoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BlockStore for IpfsBlockStore {
    async fn put_block(&self, data: &[u8]) -> Result<Cid> {
        self.put_block_raw(data).await
    }

    async fn get_block(&self, cid: &Cid) -> Result<Bytes> {
        self.get_block_raw(cid).await
    }

    async fn has_block(&self, cid: &Cid) -> Result<bool> {
        match self.block_stat(cid).await {
            Ok(_) => Ok(true),
            Err(BlockStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_block(&self, cid: &Cid) -> Result<()> {
        self.remove_block(cid).await
    }

    async fn block_size(&self, cid: &Cid) -> Result<u64> {
        Ok(self.block_stat(cid).await?.size)
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

/// Response from /api/v0/block/put
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockPutResponse {
    pub key: String,
    pub size: u64,
}

/// Block statistics
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockStat {
    pub key: String,
    pub size: u64,
}
