//! Shared HTTP plumbing for the embedded and relay servers

use axum::body::Bytes;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::error::McpError;
use crate::mcp::types::{JsonRpcError, JsonRpcMessage, RequestId};

/// Permissive CORS for browser-based clients
pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}

/// Answer every `OPTIONS` request with 200 before routing or auth
pub async fn options_short_circuit(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

/// HTTP response carrying an RPC error envelope
pub fn rpc_error(status: StatusCode, id: Option<RequestId>, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcMessage::error(id, error))).into_response()
}

/// Parse a POSTed envelope, or produce the 400 reply explaining why not
pub fn parse_envelope(body: &Bytes) -> Result<JsonRpcMessage, Response> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        debug!("Rejecting unparseable body: {}", e);
        let error = McpError::Parse {
            message: e.to_string(),
        };
        rpc_error(StatusCode::BAD_REQUEST, None, error.to_rpc_error())
    })?;

    serde_json::from_value(value).map_err(|e| {
        let error = McpError::InvalidRequest {
            message: e.to_string(),
        };
        rpc_error(StatusCode::BAD_REQUEST, None, error.to_rpc_error())
    })
}

/// 404 for unknown paths
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"}))).into_response()
}
