//! Grin node owner API client
//!
//! Only a thin slice of the API is used: a status probe at startup and
//! for periodic liveness logging.

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Chain tip as reported by the node
#[derive(Debug, Clone, Deserialize)]
pub struct NodeTip {
    /// Current chain height
    pub height: u64,
    /// Total chain difficulty
    #[serde(default)]
    pub total_difficulty: u64,
}

/// Node status response
#[derive(Debug, Clone, Deserialize)]
pub struct NodeStatus {
    /// Protocol version
    #[serde(default)]
    pub protocol_version: u32,
    /// Node user agent
    #[serde(default)]
    pub user_agent: String,
    /// Peer connection count
    #[serde(default)]
    pub connections: u32,
    /// Chain tip
    pub tip: NodeTip,
}

/// HTTP client for the node owner API
pub struct NodeApiClient {
    client: Client,
    base_url: String,
    login: String,
    password: String,
}

impl NodeApiClient {
    /// Create a client for the configured node
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(Error::NodeApi)?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", config.address, config.api_port),
            login: config.login.clone(),
            password: config.password.clone(),
        })
    }

    /// Fetch the node status
    pub async fn get_status(&self) -> Result<NodeStatus> {
        let url = format!("{}/v1/status", self.base_url);
        debug!("Requesting node status from {}", url);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.login, Some(&self.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::upstream(format!(
                "Node status request failed: {}",
                response.status()
            )));
        }

        let status = response.json::<NodeStatus>().await?;
        info!(
            height = status.tip.height,
            connections = status.connections,
            "Node status"
        );
        Ok(status)
    }
}
