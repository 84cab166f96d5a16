//! Embedded server mode
//!
//! Serves the router directly over HTTP inside the process that owns the
//! vault. No persistent channel is involved: every request is answered
//! synchronously by the router.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{McpError, Result};
use crate::mcp::router::{McpRouter, SERVER_NAME, SERVER_VERSION};
use crate::mcp::types::{ListToolsResult, MessageKind};
use crate::transport::http::{cors_layer, not_found, options_short_circuit, parse_envelope, rpc_error};

#[derive(Clone)]
struct EmbeddedState {
    router: McpRouter,
    auth_token: Option<Arc<str>>,
}

/// HTTP server answering RPC envelopes with the local router
pub struct EmbeddedServer {
    config: Config,
    router: McpRouter,
}

impl EmbeddedServer {
    pub fn new(config: Config, router: McpRouter) -> Self {
        Self { config, router }
    }

    /// The HTTP application, without a listener
    pub fn app(&self) -> Router {
        let state = EmbeddedState {
            router: self.router.clone(),
            auth_token: self.config.auth_token.as_deref().map(Arc::from),
        };

        Router::new()
            .route("/", get(identity).post(rpc))
            .route("/mcp", post(rpc))
            .route("/tools", get(list_tools))
            .fallback(not_found)
            .layer(middleware::from_fn_with_state(state.clone(), require_bearer))
            .layer(middleware::from_fn(options_short_circuit))
            .layer(cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until the process exits
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.embedded_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(
            "Embedded MCP server listening on http://{} ({} capabilities, auth {})",
            addr,
            self.router.registry().len(),
            if self.config.auth_token.is_some() { "enabled" } else { "disabled" }
        );
        axum::serve(listener, self.app()).await?;
        Ok(())
    }
}

/// Reject requests without the configured bearer token
async fn require_bearer(State(state): State<EmbeddedState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if presented == Some(expected) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "Rejecting unauthenticated request");
        rpc_error(StatusCode::UNAUTHORIZED, None, McpError::Unauthorized.to_rpc_error())
    }
}

async fn rpc(State(state): State<EmbeddedState>, body: Bytes) -> Response {
    let message = match parse_envelope(&body) {
        Ok(message) => message,
        Err(response) => return response,
    };
    let kind = message.kind();
    debug!(?kind, method = ?message.method, "Embedded request");

    match kind {
        MessageKind::Invalid => rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            McpError::InvalidRequest {
                message: "Envelope has neither id nor method".to_string(),
            }
            .to_rpc_error(),
        ),
        MessageKind::Request => match state.router.handle(message).await {
            Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        },
        MessageKind::Notification | MessageKind::Reply => {
            let _ = state.router.handle(message).await;
            StatusCode::ACCEPTED.into_response()
        }
    }
}

async fn list_tools(State(state): State<EmbeddedState>) -> Json<ListToolsResult> {
    Json(ListToolsResult {
        tools: state.router.list_tools(),
    })
}

async fn identity() -> Response {
    Json(json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "description": "MCP server for vault access",
    }))
    .into_response()
}
