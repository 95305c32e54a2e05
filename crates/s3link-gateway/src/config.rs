//! Gateway configuration
//!
//! Layered, lowest precedence first: built-in defaults, an optional config
//! file, `S3LINK_*` environment variables (`__` separates nested keys), and
//! finally command-line flags applied by the binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Region reported by GetBucketLocation
    pub region: String,
    /// Domains that enable virtual-hosted-style addressing
    pub domains: Vec<String>,
    /// Where access grants come from
    pub credential_source: CredentialSource,
    /// Accept any known access key without checking the signature
    pub skip_signature_validation: bool,
    /// S3 compatibility knobs
    pub s3: S3CompatibilityConfig,
    /// Storage backend
    pub backend: BackendConfig,
    /// Rate limit (requests per second per access key, 0 disables)
    pub rate_limit_rps: u32,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Multipart upload expiry (seconds)
    pub multipart_expiry_secs: u64,
    /// How often the sweeper looks for expired uploads (seconds)
    pub sweep_interval_secs: u64,
    /// Enable CORS
    pub cors_enabled: bool,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7777,
            region: "us-east-1".to_string(),
            domains: vec!["s3.amazonaws.com".to_string()],
            credential_source: CredentialSource::default(),
            skip_signature_validation: false,
            s3: S3CompatibilityConfig::default(),
            backend: BackendConfig::default(),
            rate_limit_rps: 100,
            max_body_size: 5 * 1024 * 1024 * 1024, // 5 GB
            multipart_expiry_secs: 24 * 60 * 60,   // 24 hours
            sweep_interval_secs: 10 * 60,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl GatewayConfig {
    /// Load defaults, then `path` (if any), then `S3LINK_*` environment variables
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("S3LINK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Multipart upload expiry as a duration
    pub fn multipart_expiry(&self) -> Duration {
        Duration::from_secs(self.multipart_expiry_secs)
    }
}

/// Knobs trading strict S3 behaviour for backend cost
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct S3CompatibilityConfig {
    /// Honour `metadata=true` on list requests
    pub include_custom_metadata_listing: bool,
    /// Hard cap on `max-keys`
    pub max_keys_limit: usize,
    /// Index entries a single list call may walk
    pub max_keys_exhaustive_limit: usize,
    /// Minimum size of every multipart part except the last
    pub min_part_size: u64,
    /// Answer CopyObject with `NotImplemented`
    pub disable_copy_object: bool,
}

impl Default for S3CompatibilityConfig {
    fn default() -> Self {
        Self {
            include_custom_metadata_listing: true,
            max_keys_limit: s3link_core::DEFAULT_MAX_KEYS,
            max_keys_exhaustive_limit: s3link_core::DEFAULT_EXHAUSTIVE_LIMIT,
            min_part_size: 5 * 1024 * 1024,
            disable_copy_object: false,
        }
    }
}

/// Storage backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Use in-memory blocks (for testing/development)
    pub use_memory_store: bool,
    /// IPFS API URL
    pub ipfs_url: String,
    /// Block size for chunking object bodies
    pub chunk_size: usize,
    /// Concurrent backend calls
    pub max_connections: usize,
    /// Timeout for dialing and for each backend call (seconds)
    pub dial_timeout_secs: u64,
    /// Total stored bytes allowed
    pub quota_bytes: Option<u64>,
    /// Refuse every write
    pub read_only: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            use_memory_store: false,
            ipfs_url: "http://localhost:5001".to_string(),
            chunk_size: s3link_blockstore::DEFAULT_CHUNK_SIZE,
            max_connections: 64,
            dial_timeout_secs: 120,
            quota_bytes: None,
            read_only: false,
        }
    }
}

impl BackendConfig {
    /// Dial timeout as a duration
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// Settings for the block-backed object store
    pub fn store_config(&self, exhaustive_limit: usize) -> s3link_core::StoreConfig {
        s3link_core::StoreConfig {
            chunk_size: self.chunk_size,
            max_connections: self.max_connections,
            dial_timeout: self.dial_timeout(),
            exhaustive_limit,
            quota_bytes: self.quota_bytes,
            read_only: self.read_only,
        }
    }
}

/// Where access grants are loaded from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Grants listed inline
    Static { grants: Vec<GrantConfig> },
    /// A JSON file holding a list of grants
    File { path: PathBuf },
    /// HS256 bearer tokens; the claims describe the grant
    Jwt { secret: String },
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::Static { grants: Vec::new() }
    }
}

/// One configured access grant
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GrantConfig {
    pub access_key_id: String,
    pub secret_key: String,
    /// Restrict the grant to one bucket
    #[serde(default)]
    pub bucket: Option<String>,
    /// Restrict the grant to keys under this prefix
    #[serde(default)]
    pub scope_prefix: Option<String>,
    /// Any of `read`, `write`, `list`, `delete`; empty means all
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
