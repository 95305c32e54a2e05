//! s3link Gateway - S3-compatible gateway over IPFS block storage

use clap::Parser;
use s3link_gateway::config::{CredentialSource, GrantConfig};
use s3link_gateway::{run_server, GatewayConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "s3link-gateway")]
#[command(about = "S3-compatible gateway for content-addressed block storage")]
#[command(version)]
struct Args {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, env = "S3LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'H', long, env = "S3LINK_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "S3LINK_PORT")]
    port: Option<u16>,

    /// Region reported to clients
    #[arg(long, env = "S3LINK_REGION")]
    region: Option<String>,

    /// IPFS API URL
    #[arg(long, env = "IPFS_API_URL")]
    ipfs_url: Option<String>,

    /// Use in-memory storage (for testing, data will not persist)
    #[arg(long, env = "S3LINK_MEMORY_STORE")]
    memory_store: bool,

    /// Access key id of a single full-access grant
    #[arg(long, env = "S3LINK_ACCESS_KEY", requires = "secret_key")]
    access_key: Option<String>,

    /// Secret key of that grant
    #[arg(long, env = "S3LINK_SECRET_KEY", requires = "access_key")]
    secret_key: Option<String>,

    /// JSON file listing access grants
    #[arg(long, env = "S3LINK_CREDENTIALS_FILE", conflicts_with = "jwt_secret")]
    credentials_file: Option<PathBuf>,

    /// Accept HS256 bearer tokens signed with this secret
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Accept known access keys without checking signatures (development only!)
    #[arg(long, env = "S3LINK_SKIP_SIGNATURE")]
    skip_signature_validation: bool,

    /// Enable debug logging
    #[arg(short, long, env = "S3LINK_DEBUG")]
    debug: bool,

    /// Log as JSON lines
    #[arg(long, env = "S3LINK_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Flags take precedence over the config file and environment
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(url) = self.ipfs_url {
            config.backend.ipfs_url = url;
        }
        if self.memory_store {
            config.backend.use_memory_store = true;
        }
        if self.skip_signature_validation {
            config.skip_signature_validation = true;
        }

        if let Some(path) = self.credentials_file {
            config.credential_source = CredentialSource::File { path };
        } else if let Some(secret) = self.jwt_secret {
            config.credential_source = CredentialSource::Jwt { secret };
        } else if let (Some(access_key_id), Some(secret_key)) = (self.access_key, self.secret_key) {
            let grant = GrantConfig {
                access_key_id,
                secret_key,
                bucket: None,
                scope_prefix: None,
                permissions: Vec::new(),
                expires_at: None,
            };
            match &mut config.credential_source {
                CredentialSource::Static { grants } => grants.push(grant),
                other => {
                    *other = CredentialSource::Static {
                        grants: vec![grant],
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("s3link_gateway={},s3link_core={},tower_http={}", log_level, log_level, log_level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    tracing::info!(
        bind = %config.bind_addr(),
        region = %config.region,
        "Starting s3link gateway"
    );
    if config.backend.use_memory_store {
        tracing::warn!("Using in-memory storage - data will NOT persist!");
    } else {
        tracing::info!("IPFS API: {}", config.backend.ipfs_url);
    }

    run_server(config).await
}
