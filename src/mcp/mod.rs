//! MCP (Model Context Protocol) module
//!
//! Wire types, the capability registry, and the router that maps MCP
//! methods onto registered capabilities.

pub mod format;
pub mod registry;
pub mod router;
pub mod types;
