//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files, and building
//! the immutable [`ForwarderConfig`] the engine runs with.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::connection::backoff::Backoff;
use crate::error::{ForwarderError, Result};

/// Maximum node identifier length in characters
pub const MAX_NODE_ID_LEN: usize = 64;

/// Maximum authentication token length in bytes
pub const MAX_TOKEN_LEN: usize = 256;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub forwarder: ForwarderSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub url: String,

    pub token: String,

    #[serde(default = "default_node_id")]
    pub node_id: String,
}

/// Reconnect and backoff configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Forwarder scheduling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ForwarderSection {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Zero disables the periodic status heartbeat
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    /// Longest wait for a refreshed reading before answering `get_battery`
    #[serde(default = "default_battery_reply_delay_ms")]
    pub battery_reply_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub dir: String,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ForwarderSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            status_interval_ms: default_status_interval_ms(),
            battery_reply_delay_ms: default_battery_reply_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: String::new(),
        }
    }
}

// Default value functions
fn default_node_id() -> String { "esp32-ble-bridge".to_string() }

fn default_base_delay_ms() -> u64 { 5000 }
fn default_max_delay_ms() -> u64 { 60000 }
fn default_connect_timeout_ms() -> u64 { 10000 }

fn default_tick_interval_ms() -> u64 { 100 }
fn default_status_interval_ms() -> u64 { 10000 }
fn default_battery_reply_delay_ms() -> u64 { 1000 }

fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ble_ws_forwarder::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the immutable engine configuration from the `[server]` section
    pub fn forwarder_config(&self) -> Result<ForwarderConfig> {
        ForwarderConfig::new(&self.server.url, &self.server.token, &self.server.node_id)
    }

    /// Backoff policy described by the `[reconnect]` section
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect.base_delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect.connect_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.forwarder.tick_interval_ms)
    }

    pub fn battery_reply_delay(&self) -> Duration {
        Duration::from_millis(self.forwarder.battery_reply_delay_ms)
    }

    /// Heartbeat period, or `None` when disabled
    pub fn status_interval(&self) -> Option<Duration> {
        match self.forwarder.status_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Server fields carry their own invariants
        self.forwarder_config()?;

        if self.reconnect.base_delay_ms == 0 || self.reconnect.base_delay_ms > 600_000 {
            return Err(invalid("base_delay_ms must be between 1 and 600000"));
        }

        if self.reconnect.max_delay_ms > 3_600_000 {
            return Err(invalid("max_delay_ms must not exceed 3600000"));
        }

        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(invalid("max_delay_ms must be greater than or equal to base_delay_ms"));
        }

        if self.reconnect.connect_timeout_ms == 0 || self.reconnect.connect_timeout_ms > 120_000 {
            return Err(invalid("connect_timeout_ms must be between 1 and 120000"));
        }

        if self.forwarder.tick_interval_ms == 0 || self.forwarder.tick_interval_ms > 10_000 {
            return Err(invalid("tick_interval_ms must be between 1 and 10000"));
        }

        if self.forwarder.status_interval_ms > 3_600_000 {
            return Err(invalid("status_interval_ms must not exceed 3600000"));
        }

        if self.forwarder.battery_reply_delay_ms > 60_000 {
            return Err(invalid("battery_reply_delay_ms must not exceed 60000"));
        }

        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ForwarderError {
    ForwarderError::ConfigInvalid(msg.into())
}

/// Immutable engine configuration
///
/// Constructed once at startup; every field is checked by [`ForwarderConfig::new`]
/// so the rest of the crate can rely on a usable endpoint, a non-empty token and
/// a node id that keeps status frames bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    server_url: String,
    auth_token: String,
    node_id: String,
    endpoint: ServerEndpoint,
}

impl ForwarderConfig {
    /// Create a validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::ConfigInvalid`] if the URL is not a usable
    /// `ws://`/`wss://` endpoint, the token is empty or too long, or the node id
    /// is empty, too long, or contains characters outside `[A-Za-z0-9-_.:]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ble_ws_forwarder::config::ForwarderConfig;
    ///
    /// let config = ForwarderConfig::new("ws://10.0.0.2:8080/ws/node", "abc123", "node-1")?;
    /// assert_eq!(config.endpoint().port, 8080);
    /// # Ok::<(), ble_ws_forwarder::error::ForwarderError>(())
    /// ```
    pub fn new(server_url: &str, auth_token: &str, node_id: &str) -> Result<Self> {
        let endpoint = ServerEndpoint::parse(server_url)?;

        if auth_token.is_empty() {
            return Err(invalid("token cannot be empty"));
        }
        if auth_token.len() > MAX_TOKEN_LEN {
            return Err(invalid(format!("token must be at most {} bytes", MAX_TOKEN_LEN)));
        }

        if node_id.is_empty() || node_id.len() > MAX_NODE_ID_LEN {
            return Err(invalid(format!(
                "node_id must be between 1 and {} characters",
                MAX_NODE_ID_LEN
            )));
        }
        if let Some(c) = node_id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        {
            return Err(invalid(format!("node_id contains invalid character {:?}", c)));
        }

        Ok(Self {
            server_url: server_url.to_string(),
            auth_token: auth_token.to_string(),
            node_id: node_id.to_string(),
            endpoint,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }
}

/// Parsed WebSocket endpoint, used for validation and logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl ServerEndpoint {
    /// Parse a `ws://` or `wss://` URL into its parts
    ///
    /// Port defaults to 80 (`ws`) or 443 (`wss`); path defaults to `/` and
    /// keeps any query string. User info is accepted and not retained.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| invalid(format!("invalid server url {:?}: {}", raw, e)))?;

        let secure = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(invalid(format!(
                    "server url must use ws:// or wss://, got {}://",
                    other
                )))
            }
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(invalid("server url host cannot be empty")),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("server url has no port"))?;
        if port == 0 {
            return Err(invalid("server url port cannot be 0"));
        }

        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(Self {
            secure,
            host: host.to_string(),
            port,
            path,
        })
    }
}

impl std::fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}
