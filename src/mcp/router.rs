//! MCP router
//!
//! Translates MCP methods (`initialize`, `tools/list`, `tools/call`, `ping`,
//! notifications) onto the capability registry, and also accepts raw method
//! calls addressed directly by capability name.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::bridge::link::InboundHandler;
use crate::mcp::format::format_tool_result;
use crate::mcp::registry::CapabilityRegistry;
use crate::mcp::types::*;

/// MCP Server info
pub const SERVER_NAME: &str = "vault-mcp-bridge";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// External tool names accepted by `tools/call` and the capability each maps to
pub const TOOL_NAME_MAP: &[(&str, &str)] = &[
    ("vault_list_notes", "vault.listNotes"),
    ("vault_get_note", "vault.getNote"),
    ("vault_search", "vault.search"),
    ("vault_get_metadata", "vault.getFileMetadata"),
    ("dataview_query", "dataview.query"),
    ("tasks_query", "tasks.query"),
    ("tasks_list", "tasks.list"),
    ("plugins_list", "plugins.list"),
    ("templater_render", "templater.render"),
];

/// Map an external tool name to its capability name; unmapped names pass
/// through unchanged
pub fn resolve_tool_name(name: &str) -> &str {
    TOOL_NAME_MAP
        .iter()
        .find(|(external, _)| *external == name)
        .map(|(_, internal)| *internal)
        .unwrap_or(name)
}

/// Routes envelopes to the capability registry
#[derive(Debug, Clone)]
pub struct McpRouter {
    registry: Arc<CapabilityRegistry>,
}

impl McpRouter {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Metadata for every registered capability
    pub fn list_tools(&self) -> Vec<Tool> {
        self.registry.list().collect()
    }

    /// Handle one envelope
    ///
    /// Requests always get exactly one reply. Notifications, replies and
    /// id-less garbage never do, whatever the outcome.
    pub async fn handle(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        let id = message.id.clone();
        let method = match (message.kind(), message.method) {
            (MessageKind::Request | MessageKind::Notification, Some(method)) => method,
            (kind, _) => {
                debug!(?kind, ?id, "Ignoring envelope without a method to route");
                return None;
            }
        };

        if !message.jsonrpc.is_empty() && message.jsonrpc != JSONRPC_VERSION {
            return id.map(|id| {
                JsonRpcMessage::error(Some(id), JsonRpcError::invalid_request("Invalid JSON-RPC version"))
            });
        }

        let outcome = self.dispatch(&method, message.params).await;

        match (id, outcome) {
            (Some(id), Ok(result)) => Some(JsonRpcMessage::success(id, result)),
            (Some(id), Err(error)) => {
                debug!(%method, code = error.code, "Request failed: {}", error.message);
                Some(JsonRpcMessage::error(Some(id), error))
            }
            (None, Ok(_)) => None,
            (None, Err(error)) => {
                debug!(%method, "Dropping error for notification: {}", error.message);
                None
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        match method {
            methods::INITIALIZE => self.handle_initialize(),
            methods::PING => Ok(json!({})),
            methods::LIST_TOOLS => self.handle_list_tools(),
            methods::CALL_TOOL => self.handle_call_tool(params).await,
            m if m.starts_with(methods::NOTIFICATION_PREFIX) => {
                debug!(method = m, "Received notification");
                Ok(Value::Null)
            }
            m => {
                let params = params.unwrap_or_else(|| json!({}));
                self.registry
                    .invoke(m, params)
                    .await
                    .map_err(|e| e.to_rpc_error())
            }
        }
    }

    fn handle_initialize(&self) -> Result<Value, JsonRpcError> {
        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {}),
            },
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: self.list_tools(),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tool parameters: {}", e)))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool parameters")),
        };

        let capability = resolve_tool_name(&params.name);
        let arguments = match params.arguments {
            Value::Null => json!({}),
            other => other,
        };

        let result = self
            .registry
            .invoke(capability, arguments)
            .await
            .map_err(|e| e.to_rpc_error())?;

        let text = format_tool_result(capability, &result);
        serde_json::to_value(CallToolResult::text(text))
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}

#[async_trait]
impl InboundHandler for McpRouter {
    async fn on_message(&self, message: JsonRpcMessage, _frame: &str) -> Option<JsonRpcMessage> {
        if message.kind() == MessageKind::Invalid {
            warn!("Dropping envelope with neither id nor method");
        }
        self.handle(message).await
    }
}
