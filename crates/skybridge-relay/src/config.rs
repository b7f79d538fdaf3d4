// ============================================
// File: crates/skybridge-relay/src/config.rs
// ============================================
//! # Relay Node Configuration
//!
//! ## Creation Reason
//! Provides configuration management for a relay node, supporting TOML
//! files with per-field defaults.
//!
//! ## Main Functionality
//! - `RelayConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//! - Defaults matching the reference deployment
//!
//! ## Configuration Sections
//! - `node`: Node identity and backend credential
//! - `network`: Device command port, status port range, datagram buffers
//! - `backend`: Base URL, video relay host, heartbeat/request timing
//! - `discovery`: Subnet, probe tuning, authorized device allow-list
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [node]
//! name = "relay_box_1"
//! password = "secret"
//!
//! [backend]
//! base_url = "http://203.0.113.10:8000"
//! video_relay_host = "203.0.113.10"
//!
//! [discovery]
//! subnet_prefix = "192.168.137."
//! authorized_devices = ["60:60:1f:5b:4b:ea"]
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require node restart
//! - The status port range caps fleet size; 254 ports means at most 253
//!   drones given the name space bound
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RelayError, Result};
use crate::types::MacAddr;

// ============================================
// RelayConfig
// ============================================

/// Main relay node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    /// Node identity configuration.
    #[serde(default)]
    pub node: NodeConfig,

    /// Device network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Backend service configuration.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Discovery configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RelayError::config_load(&path_str, e))?;

        let config: Self =
            toml::from_str(&content).map_err(|e| RelayError::config_load(&path_str, e))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RelayError::config_load("<string>", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.network.validate()?;
        self.backend.validate()?;
        self.discovery.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================
// NodeConfig
// ============================================

/// Node identity configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name reported to the backend.
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Credential exchanged for a bearer token at startup.
    #[serde(default)]
    pub password: String,
}

fn default_node_name() -> String {
    "relay_box_1".to_string()
}

impl NodeConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RelayError::config_invalid("node.name", "cannot be empty"));
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            password: String::new(),
        }
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Device network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP control port every device listens on.
    #[serde(default = "default_command_port")]
    pub command_port: u16,

    /// First status port in the leasable range.
    #[serde(default = "default_status_port_first")]
    pub status_port_first: u16,

    /// Number of leasable status ports.
    #[serde(default = "default_status_port_count")]
    pub status_port_count: u16,

    /// Datagram buffer size for status and video sockets.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_command_port() -> u16 {
    8889
}

fn default_status_port_first() -> u16 {
    50400
}

fn default_status_port_count() -> u16 {
    254
}

fn default_buffer_size() -> usize {
    2048
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.command_port == 0 {
            return Err(RelayError::config_invalid(
                "network.command_port",
                "cannot be 0",
            ));
        }

        if self.status_port_count == 0 {
            return Err(RelayError::config_invalid(
                "network.status_port_count",
                "must be at least 1",
            ));
        }

        let last = u32::from(self.status_port_first) + u32::from(self.status_port_count) - 1;
        if last > u32::from(u16::MAX) {
            return Err(RelayError::config_invalid(
                "network.status_port_first",
                "range overflows the port space",
            ));
        }

        if self.buffer_size < 512 {
            return Err(RelayError::config_invalid(
                "network.buffer_size",
                "must be at least 512",
            ));
        }

        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            command_port: default_command_port(),
            status_port_first: default_status_port_first(),
            status_port_count: default_status_port_count(),
            buffer_size: default_buffer_size(),
        }
    }
}

// ============================================
// BackendConfig
// ============================================

/// Backend service configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend HTTP API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Host the backend's video relay listens on; per-drone ports are
    /// assigned at session start.
    #[serde(default = "default_video_relay_host")]
    pub video_relay_host: Ipv4Addr,

    /// Heartbeat reporting interval in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay between failed authentication attempts in seconds.
    #[serde(default = "default_auth_retry")]
    pub auth_retry_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_video_relay_host() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_heartbeat_interval() -> u64 {
    3
}

fn default_request_timeout() -> u64 {
    10
}

fn default_auth_retry() -> u64 {
    10
}

impl BackendConfig {
    fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(RelayError::config_invalid(
                "backend.base_url",
                "must start with http:// or https://",
            ));
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(RelayError::config_invalid(
                "backend.heartbeat_interval_secs",
                "must be at least 1",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(RelayError::config_invalid(
                "backend.request_timeout_secs",
                "must be at least 1",
            ));
        }

        Ok(())
    }

    /// Returns the heartbeat interval as a `Duration`.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Returns the per-request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the authentication retry delay as a `Duration`.
    #[must_use]
    pub fn auth_retry_delay(&self) -> Duration {
        Duration::from_secs(self.auth_retry_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            video_relay_host: default_video_relay_host(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            request_timeout_secs: default_request_timeout(),
            auth_retry_secs: default_auth_retry(),
        }
    }
}

// ============================================
// DiscoveryConfig
// ============================================

/// Discovery configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Subnet prefix the drone access point hands out, e.g. "192.168.137.".
    #[serde(default = "default_subnet_prefix")]
    pub subnet_prefix: String,

    /// Number of reachability probes per candidate.
    #[serde(default = "default_probe_count")]
    pub probe_count: u32,

    /// Per-probe deadline in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Pause between scan cycles in seconds.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Hardware addresses of devices this node may adopt.
    #[serde(default)]
    pub authorized_devices: Vec<MacAddr>,
}

fn default_subnet_prefix() -> String {
    "192.168.137.".to_string()
}

fn default_probe_count() -> u32 {
    4
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_scan_interval() -> u64 {
    5
}

impl DiscoveryConfig {
    fn validate(&self) -> Result<()> {
        if self.subnet_prefix.is_empty() {
            return Err(RelayError::config_invalid(
                "discovery.subnet_prefix",
                "cannot be empty",
            ));
        }

        if self.probe_count == 0 {
            return Err(RelayError::config_invalid(
                "discovery.probe_count",
                "must be at least 1",
            ));
        }

        Ok(())
    }

    /// Returns the per-probe deadline as a `Duration`.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Returns the inter-scan pause as a `Duration`.
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            subnet_prefix: default_subnet_prefix(),
            probe_count: default_probe_count(),
            probe_timeout_ms: default_probe_timeout_ms(),
            scan_interval_secs: default_scan_interval(),
            authorized_devices: Vec::new(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================
