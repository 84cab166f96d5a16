//! Configuration management for the vault MCP bridge
//!
//! Handles environment variables, defaults, and validation.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use validator::Validate;

use crate::bridge::connection::ReconnectPolicy;
use crate::error::{BridgeError, ConfigError, Result};

/// Default embedded server port
pub const DEFAULT_PORT: u16 = 4123;

/// Default relay WebSocket port (host side connects here)
pub const DEFAULT_WS_PORT: u16 = 4124;

/// Default relay HTTP port (clients connect here)
pub const DEFAULT_HTTP_PORT: u16 = 4125;

/// Configuration for the vault MCP bridge
#[derive(Debug, Clone, Validate)]
pub struct Config {
    /// Root directory of the vault
    pub vault_path: PathBuf,

    /// Bind address for the HTTP servers
    pub host: String,

    /// Embedded server port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Bearer token required by the embedded server; `None` disables auth
    pub auth_token: Option<String>,

    /// Relay WebSocket port
    #[validate(range(min = 1))]
    pub ws_port: u16,

    /// Relay HTTP port
    #[validate(range(min = 1))]
    pub http_port: u16,

    /// How long the relay waits for the host to answer a request
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    /// Relay endpoint the host side dials
    #[validate(url)]
    pub relay_url: String,

    /// Delay between reconnect attempts
    #[validate(range(min = 1))]
    pub reconnect_interval_ms: u64,

    /// Reconnect attempts before giving up; 0 retries forever
    pub max_reconnect_attempts: u32,

    /// Frames buffered per streaming listener before it is dropped
    #[validate(range(min = 1))]
    pub listener_buffer: usize,
}

impl Config {
    /// Create a configuration from environment variables and defaults
    pub fn new() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create a configuration reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vault_path = match lookup("VAULT_MCP_VAULT") {
            Some(path) => expand_tilde(&path),
            None => std::env::current_dir().map_err(BridgeError::Io)?,
        };

        let config = Self {
            vault_path,
            host: lookup("VAULT_MCP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(&lookup, "VAULT_MCP_PORT").unwrap_or(DEFAULT_PORT),
            auth_token: lookup("VAULT_MCP_AUTH_TOKEN").filter(|token| !token.is_empty()),
            ws_port: parse_var(&lookup, "VAULT_MCP_WS_PORT").unwrap_or(DEFAULT_WS_PORT),
            http_port: parse_var(&lookup, "VAULT_MCP_HTTP_PORT").unwrap_or(DEFAULT_HTTP_PORT),
            request_timeout_secs: parse_var(&lookup, "VAULT_MCP_REQUEST_TIMEOUT_SECS").unwrap_or(30),
            relay_url: lookup("VAULT_MCP_RELAY_URL")
                .unwrap_or_else(|| format!("ws://127.0.0.1:{}/mcp", DEFAULT_WS_PORT)),
            reconnect_interval_ms: parse_var(&lookup, "VAULT_MCP_RECONNECT_MS").unwrap_or(5000),
            max_reconnect_attempts: parse_var(&lookup, "VAULT_MCP_MAX_RECONNECTS").unwrap_or(0),
            listener_buffer: parse_var(&lookup, "VAULT_MCP_LISTENER_BUFFER").unwrap_or(64),
        };

        Ok(config)
    }

    /// Validate field ranges and the vault directory
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(ConfigError::from)?;
        if !self.vault_path.is_dir() {
            return Err(ConfigError::VaultNotFound {
                path: self.vault_path.display().to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: Duration::from_millis(self.reconnect_interval_ms),
            max_attempts: self.max_reconnect_attempts,
            request_timeout: self.request_timeout(),
        }
    }

    pub fn embedded_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn relay_ws_addr(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }

    pub fn relay_http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
