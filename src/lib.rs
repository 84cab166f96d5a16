//! Vault MCP Bridge Library
//!
//! Exposes a vault's capabilities to MCP clients, either directly over HTTP
//! (embedded mode) or through a relay the vault host dials into.

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod mcp;
pub mod transport;
pub mod vault;

pub use config::Config;
pub use error::{BridgeError, Result};
