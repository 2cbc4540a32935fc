//! Server configuration.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! - Built-in defaults
//! - TOML configuration file (`RELAY_CONFIG`, or the first of the default paths)
//! - Environment variables (`RELAY_*`, nested keys separated by `__`)

use anyhow::{bail, Context, Result};
use relay_core::RelayConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default configuration file locations, in priority order.
const CONFIG_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Message and session retention.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Enable the WebSocket push channel.
    #[serde(default = "default_true")]
    pub websocket: bool,

    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Enable the HTTP polling API (`/connect`, `/poll`, `/send`, `/disconnect`).
    #[serde(default = "default_true")]
    pub polling: bool,
}

/// Retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum number of retained messages.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Maximum message age in milliseconds.
    #[serde(default = "default_message_ttl")]
    pub message_ttl_ms: u64,

    /// Session idle timeout in milliseconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// Expiry sweep interval in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Maximum message content size in bytes.
    #[serde(default = "default_max_content_len")]
    pub max_content_len: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between WebSocket pings in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_messages() -> usize {
    1_000
}

fn default_message_ttl() -> u64 {
    300_000 // 5 minutes
}

fn default_idle_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_sweep_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_max_content_len() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            retention: RetentionConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket: true,
            websocket_path: default_ws_path(),
            polling: true,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            message_ttl_ms: default_message_ttl(),
            idle_timeout_ms: default_idle_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            max_content_len: default_max_content_len(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, then the environment.
    ///
    /// `RELAY_CONFIG` names an explicit file; otherwise the default paths are
    /// searched. Missing files fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RELAY_CONFIG").ok().or_else(|| {
            CONFIG_PATHS
                .iter()
                .map(|p| shellexpand::tilde(p).into_owned())
                .find(|p| Path::new(p).exists())
        });

        Self::build(path.as_deref())
    }

    /// Build configuration from an optional TOML file plus `RELAY_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn build(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(path, config::FileFormat::Toml).required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| match path {
                Some(path) => format!("Failed to load config file: {path}"),
                None => "Failed to load configuration".to_string(),
            })?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Check the configuration before starting the server.
    ///
    /// Besides the core limits, a push session is only kept alive by answering
    /// heartbeat pings, so pings must arrive within the idle timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay settings are invalid or the heartbeat
    /// interval is zero or not shorter than the idle timeout.
    pub fn validate(&self) -> Result<()> {
        self.relay_config()
            .validate()
            .context("Invalid retention configuration")?;

        if self.heartbeat.interval_ms == 0 {
            bail!("heartbeat.interval_ms must be greater than zero");
        }
        if self.heartbeat.interval_ms >= self.retention.idle_timeout_ms {
            bail!(
                "heartbeat.interval_ms ({}) must be shorter than retention.idle_timeout_ms ({})",
                self.heartbeat.interval_ms,
                self.retention.idle_timeout_ms
            );
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Relay core settings derived from this configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_messages: self.retention.max_messages,
            retention: Duration::from_millis(self.retention.message_ttl_ms),
            idle_timeout: Duration::from_millis(self.retention.idle_timeout_ms),
            sweep_interval: Duration::from_millis(self.retention.sweep_interval_ms),
            max_content_len: self.retention.max_content_len,
        }
    }

    /// Interval between WebSocket heartbeat pings.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }
}
