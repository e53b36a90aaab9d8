//! Bootstrap client configuration

use crate::BootstrapError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Path suffix of the relay endpoint a root registers on
pub const ROOT_PATH: &str = "webrtc-bootstrap-root";

/// Path of the relay endpoint connection attempts join
pub const JOIN_PATH: &str = "join";

/// Relay service location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEndpoint {
    /// Host (and optional port) of the relay, without scheme
    pub address: String,
    /// Use the encrypted transport scheme (`wss`)
    #[serde(default)]
    pub secure: bool,
}

impl HostEndpoint {
    /// Create a new host endpoint
    pub fn new(address: impl Into<String>, secure: bool) -> Self {
        Self {
            address: address.into(),
            secure,
        }
    }

    /// URL scheme selected by the `secure` flag
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// Endpoint a root registers on for the given shared secret
    pub fn root_url(&self, secret: &str) -> String {
        format!("{}://{}/{}/{}", self.scheme(), self.address, secret, ROOT_PATH)
    }

    /// Endpoint every connection attempt joins
    pub fn join_url(&self) -> String {
        format!("{}://{}/{}", self.scheme(), self.address, JOIN_PATH)
    }
}

impl Default for HostEndpoint {
    fn default() -> Self {
        Self::new("localhost:5000", false)
    }
}

/// Bootstrap client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Relay service
    pub host: HostEndpoint,
    /// Keepalive period on the root channel, in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Poll period while the negotiator is not ready for inbound signals
    pub readiness_retry_ms: u64,
    /// Deadline applied to attempts whose options set none
    pub default_timeout_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            host: HostEndpoint::default(),
            heartbeat_interval_ms: 10_000,
            readiness_retry_ms: 300,
            default_timeout_ms: 30_000,
        }
    }
}

impl BootstrapConfig {
    /// Default configuration for the given relay
    pub fn new(address: impl Into<String>, secure: bool) -> Self {
        Self {
            host: HostEndpoint::new(address, secure),
            ..Default::default()
        }
    }

    /// Parse a JSON configuration document; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, BootstrapError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BootstrapError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&contents).context("Failed to parse config file")
    }

    /// Reject configurations that would stall or spin
    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.host.address.trim().is_empty() {
            return Err(BootstrapError::InvalidConfig(
                "relay address is empty".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(BootstrapError::InvalidConfig(
                "heartbeat_interval_ms must be > 0".to_string(),
            ));
        }
        if self.readiness_retry_ms == 0 {
            return Err(BootstrapError::InvalidConfig(
                "readiness_retry_ms must be > 0".to_string(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(BootstrapError::InvalidConfig(
                "default_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn readiness_retry(&self) -> Duration {
        Duration::from_millis(self.readiness_retry_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
