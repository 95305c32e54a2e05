//! Application state

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use std::sync::Arc;

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Request handler
    pub gateway: Arc<Gateway>,
}

impl AppState {
    /// Build the backend and credentials from configuration
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let gateway = Arc::new(Gateway::from_config(&config).await?);
        Ok(Self { config, gateway })
    }

    /// Serve an already assembled gateway
    pub fn with_gateway(config: GatewayConfig, gateway: Arc<Gateway>) -> Self {
        Self { config, gateway }
    }
}
