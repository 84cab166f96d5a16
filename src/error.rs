//! Error types for the vault MCP bridge
//!
//! This module defines the error hierarchy for all operations in the bridge
//! and the mapping of each protocol-facing error onto a JSON-RPC error code.

use std::time::Duration;

use thiserror::Error;

use crate::mcp::types::{codes, JsonRpcError, RequestId};

/// Main error type for the vault MCP bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Capability registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Pending request errors (timeouts, dropped connections)
    #[error("Pending request error: {0}")]
    Pending(#[from] PendingError),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// Vault access errors
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket errors on the host link
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Vault directory not found: {path}")]
    VaultNotFound { path: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ConfigError::InvalidConfig {
            message: errors.to_string(),
        }
    }
}

/// A capability's own failure, surfaced verbatim to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct InvocationError {
    pub message: String,
}

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<VaultError> for InvocationError {
    fn from(err: VaultError) -> Self {
        InvocationError::new(err.to_string())
    }
}

impl From<serde_json::Error> for InvocationError {
    fn from(err: serde_json::Error) -> Self {
        InvocationError::new(format!("Invalid arguments: {}", err))
    }
}

/// Capability registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Capability already registered: {name}")]
    DuplicateName { name: String },

    #[error("Unknown capability: {name}")]
    UnknownCapability { name: String },

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// Terminal outcomes of a pending request other than a successful result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PendingError {
    #[error("Request id already pending: {id}")]
    DuplicateId { id: RequestId },

    #[error("Request {id} timed out after {}ms", .after.as_millis())]
    Timeout { id: RequestId, after: Duration },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("{}", .0.message)]
    Remote(JsonRpcError),
}

/// MCP protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Authentication required. Please provide Bearer token in Authorization header.")]
    Unauthorized,
}

/// Vault access errors
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("not a file: {path}")]
    NotAFile { path: String },

    #[error("path escapes the vault: {path}")]
    OutsideVault { path: String },

    #[error("invalid line number {line_number} in {path}")]
    InvalidLine { path: String, line_number: usize },

    #[error("line {line_number} in {path} is not a task")]
    NotATask { path: String, line_number: usize },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl McpError {
    /// JSON-RPC error object for this protocol error
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            McpError::Parse { .. } => codes::PARSE_ERROR,
            McpError::InvalidRequest { .. } | McpError::Unauthorized => codes::INVALID_REQUEST,
        };
        JsonRpcError::new(code, self.to_string())
    }
}

impl RegistryError {
    /// JSON-RPC error object for this registry error
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            RegistryError::UnknownCapability { name } => JsonRpcError::method_not_found(name),
            RegistryError::DuplicateName { .. } => JsonRpcError::internal_error(self.to_string()),
            // Capability failures travel verbatim.
            RegistryError::Invocation(e) => JsonRpcError::internal_error(e.message.clone()),
        }
    }
}

impl PendingError {
    /// JSON-RPC error object for this pending-request outcome
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            PendingError::DuplicateId { .. } => JsonRpcError::new(codes::DUPLICATE_ID, self.to_string()),
            PendingError::Timeout { .. } => JsonRpcError::new(codes::REQUEST_TIMEOUT, self.to_string()),
            PendingError::ConnectionClosed => JsonRpcError::connection_closed(),
            PendingError::Remote(e) => e.clone(),
        }
    }
}
