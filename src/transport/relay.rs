//! Relay server mode
//!
//! The relay runs where clients can reach it. The host that owns the vault
//! dials in over WebSocket (`ws://<host>:<ws_port>/mcp`) and keeps that
//! channel open; clients talk to the relay over HTTP (`POST /mcp`) and attach
//! SSE listeners (`GET /mcp`) for server-initiated messages.

use std::convert::Infallible;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use futures_util::{stream, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::bridge::broadcast::Broadcaster;
use crate::bridge::link::{FrameChannel, Link};
use crate::bridge::websocket::{pump, text_from_binary, Received, WireMessage};
use crate::config::Config;
use crate::error::{McpError, PendingError, Result};
use crate::mcp::types::{JsonRpcMessage, MessageKind, JSONRPC_VERSION};
use crate::transport::http::{cors_layer, not_found, options_short_circuit, parse_envelope, rpc_error};

#[derive(Clone)]
struct RelayState {
    link: Arc<Link>,
    broadcaster: Broadcaster,
    request_timeout: Duration,
    shutdown: CancellationToken,
    ws_url: String,
    http_url: String,
}

/// Relay between one WebSocket host and any number of HTTP clients
pub struct RelayServer {
    state: RelayState,
}

impl RelayServer {
    pub fn new(config: &Config) -> Self {
        let broadcaster = Broadcaster::new(config.listener_buffer);
        let link = Arc::new(Link::new(Arc::new(broadcaster.clone())));
        Self {
            state: RelayState {
                link,
                broadcaster,
                request_timeout: config.request_timeout(),
                shutdown: CancellationToken::new(),
                ws_url: format!("ws://{}/mcp", config.relay_ws_addr()),
                http_url: format!("http://{}/mcp", config.relay_http_addr()),
            },
        }
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.state.link
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.state.broadcaster
    }

    /// Cancelling this token stops both listeners and closes the host channel
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// WebSocket endpoint the host dials
    pub fn host_app(&self) -> Router {
        Router::new()
            .route("/mcp", get(host_upgrade))
            .route("/", get(host_upgrade))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// HTTP surface for clients
    pub fn client_app(&self) -> Router {
        Router::new()
            .route("/", get(info_page))
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/mcp", get(attach_listener).post(forward))
            .fallback(not_found)
            .layer(middleware::from_fn(options_short_circuit))
            .layer(cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured ports and serve until shut down
    pub async fn serve(self, config: &Config) -> Result<()> {
        let ws_listener = TcpListener::bind(config.relay_ws_addr()).await?;
        let http_listener = TcpListener::bind(config.relay_http_addr()).await?;
        self.serve_on(ws_listener, http_listener).await
    }

    /// Serve on already-bound listeners
    pub async fn serve_on(self, ws_listener: TcpListener, http_listener: TcpListener) -> Result<()> {
        info!("Relay waiting for host on ws://{}/mcp", ws_listener.local_addr()?);
        info!("Relay accepting clients on http://{}/mcp", http_listener.local_addr()?);

        let shutdown = self.state.shutdown.clone();
        let host = axum::serve(ws_listener, self.host_app())
            .with_graceful_shutdown(shutdown.clone().cancelled_owned());
        let clients = axum::serve(http_listener, self.client_app())
            .with_graceful_shutdown(shutdown.clone().cancelled_owned());

        let served = tokio::try_join!(host.into_future(), clients.into_future());
        self.state.link.close();
        served?;
        Ok(())
    }
}

async fn host_upgrade(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| attach_host(state, socket))
}

async fn attach_host(state: RelayState, socket: WebSocket) {
    let FrameChannel { outgoing, incoming } = pump(socket);
    let session = state.link.attach(outgoing);
    info!(session, "Host connected");

    state.link.serve(session, incoming, &state.shutdown).await;
    info!(session, "Host disconnected");
}

impl WireMessage for Message {
    fn text(frame: String) -> Self {
        Message::Text(frame)
    }

    fn classify(self) -> Received {
        match self {
            Message::Text(text) => Received::Text(text),
            Message::Binary(bytes) => text_from_binary(bytes),
            Message::Close(_) => Received::Close,
            _ => Received::Skip,
        }
    }
}

async fn health(State(state): State<RelayState>) -> Response {
    Json(json!({
        "status": "ok",
        "connected": state.link.is_connected(),
        "sseClients": state.broadcaster.len(),
        "pending": state.link.pending().len(),
    }))
    .into_response()
}

async fn ready(State(state): State<RelayState>) -> Response {
    if state.link.is_connected() {
        Json(json!({
            "ready": true,
            "message": "Relay is ready to accept MCP requests",
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ready": false,
                "message": "Waiting for the host to connect",
            })),
        )
            .into_response()
    }
}

async fn attach_listener(State(state): State<RelayState>, headers: HeaderMap) -> Response {
    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));
    if !wants_stream {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed: GET requires Accept: text/event-stream",
        )
            .into_response();
    }

    let subscription = state.broadcaster.subscribe();
    info!(listener = %subscription.id(), "SSE client connected");

    let lead_in = stream::once(async {
        Ok::<Event, Infallible>(Event::default().comment("SSE connection established"))
    });
    let frames = subscription.map(|frame| Ok::<Event, Infallible>(Event::default().data(frame)));

    (
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(
            lead_in
                .chain(frames)
                .take_until(state.shutdown.clone().cancelled_owned()),
        )
        .keep_alive(KeepAlive::default()),
    )
        .into_response()
}

async fn forward(State(state): State<RelayState>, body: Bytes) -> Response {
    let mut message = match parse_envelope(&body) {
        Ok(message) => message,
        Err(response) => return response,
    };
    // Clients may omit the version; the host channel always carries it.
    if message.jsonrpc.is_empty() {
        message.jsonrpc = JSONRPC_VERSION.to_string();
    }

    match message.kind() {
        MessageKind::Request => {
            let Some(id) = message.id.clone() else {
                return StatusCode::ACCEPTED.into_response();
            };
            debug!(%id, method = ?message.method, "Forwarding request to host");
            match state.link.request(message, state.request_timeout).await {
                Ok(result) => Json(JsonRpcMessage::success(id, result)).into_response(),
                Err(PendingError::Remote(error)) => {
                    Json(JsonRpcMessage::error(Some(id), error)).into_response()
                }
                Err(e) => {
                    warn!(%id, "Request failed: {}", e);
                    rpc_error(status_for(&e), Some(id), e.to_rpc_error())
                }
            }
        }
        MessageKind::Notification | MessageKind::Reply => match state.link.send(&message) {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(e) => rpc_error(status_for(&e), None, e.to_rpc_error()),
        },
        MessageKind::Invalid => rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            McpError::InvalidRequest {
                message: "Envelope has neither id nor method".to_string(),
            }
            .to_rpc_error(),
        ),
    }
}

/// HTTP status for a request that could not be answered by the host
pub fn status_for(error: &PendingError) -> StatusCode {
    match error {
        PendingError::ConnectionClosed => StatusCode::SERVICE_UNAVAILABLE,
        PendingError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PendingError::DuplicateId { .. } => StatusCode::CONFLICT,
        PendingError::Remote(_) => StatusCode::OK,
    }
}

async fn info_page(State(state): State<RelayState>) -> Html<String> {
    let status = if state.link.is_connected() { "Connected" } else { "Disconnected" };
    Html(format!(
        "<html>\n<head><title>Vault MCP Relay</title></head>\n<body>\n\
         <h1>Vault MCP Relay</h1>\n\
         <p><strong>Host endpoint:</strong> {ws}</p>\n\
         <p><strong>Client endpoint:</strong> {http}</p>\n\
         <p><strong>Host status:</strong> {status}</p>\n\
         <p><strong>SSE clients:</strong> {clients}</p>\n\
         <h2>Transports</h2>\n<ul>\n\
         <li>SSE: GET /mcp with Accept: text/event-stream</li>\n\
         <li>HTTP: POST /mcp with JSON-RPC messages</li>\n\
         </ul>\n</body>\n</html>\n",
        ws = state.ws_url,
        http = state.http_url,
        status = status,
        clients = state.broadcaster.len(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::{codes, RequestId};
    use axum::body::Body;
    use axum::http::{Method, Request as HttpRequest};
    use serde_json::Value;
    use tower::ServiceExt;

    fn relay() -> RelayServer {
        RelayServer::new(&Config::from_lookup(|_| None).unwrap())
    }

    fn post(body: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_disconnected_host() {
        let response = relay()
            .client_app()
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connected"], false);
        assert_eq!(body["sseClients"], 0);
    }

    #[tokio::test]
    async fn test_ready_follows_host_connection() {
        let relay = relay();
        let response = relay
            .client_app()
            .oneshot(HttpRequest::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let (channel, _remote) = FrameChannel::pair();
        relay.link().attach(channel.outgoing);
        let response = relay
            .client_app()
            .oneshot(HttpRequest::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_without_event_stream_accept() {
        let response = relay()
            .client_app()
            .oneshot(HttpRequest::get("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_request_while_disconnected() {
        let response = relay()
            .client_app()
            .oneshot(post(r#"{"id":5,"method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["id"], 5);
        assert_eq!(body["error"]["code"], codes::CONNECTION_CLOSED);
    }

    #[tokio::test]
    async fn test_request_is_answered_by_host() {
        let relay = relay();
        let (channel, mut host) = FrameChannel::pair();
        relay.link().attach(channel.outgoing);

        let link = relay.link().clone();
        tokio::spawn(async move {
            let frame = host.incoming.recv().await.unwrap();
            let request: JsonRpcMessage = serde_json::from_str(&frame).unwrap();
            let reply = JsonRpcMessage::success(request.id.unwrap(), json!({}));
            link.handle_frame(&serde_json::to_string(&reply).unwrap()).await;
            host
        });

        let response = relay
            .client_app()
            .oneshot(post(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], "a");
        assert_eq!(body["result"], json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let relay = relay();
        let (channel, _host) = FrameChannel::pair();
        relay.link().attach(channel.outgoing);

        let response = relay
            .client_app()
            .oneshot(post(r#"{"id":9,"method":"tools/list"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json_body(response).await["error"]["code"], codes::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_notification_is_forwarded_with_202() {
        let relay = relay();
        let (channel, mut host) = FrameChannel::pair();
        relay.link().attach(channel.outgoing);

        let response = relay
            .client_app()
            .oneshot(post(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let forwarded: JsonRpcMessage = serde_json::from_str(&host.incoming.recv().await.unwrap()).unwrap();
        assert_eq!(forwarded.method.as_deref(), Some("notifications/initialized"));
        assert!(relay.link().pending().is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_envelopes_carry_version() {
        let relay = relay();
        let (channel, mut host) = FrameChannel::pair();
        relay.link().attach(channel.outgoing);

        let response = relay
            .client_app()
            .oneshot(post(r#"{"method":"notifications/initialized"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let frame: Value = serde_json::from_str(&host.incoming.recv().await.unwrap()).unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");

        let link = relay.link().clone();
        let answer = tokio::spawn(async move {
            let frame = host.incoming.recv().await.unwrap();
            let request: JsonRpcMessage = serde_json::from_str(&frame).unwrap();
            link.handle_frame(&serde_json::to_string(&JsonRpcMessage::success(request.id.unwrap(), json!({}))).unwrap())
                .await;
            frame
        });
        let response = relay
            .client_app()
            .oneshot(post(r#"{"id":11,"method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let frame: Value = serde_json::from_str(&answer.await.unwrap()).unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["id"], 11);
    }

    #[test]
    fn test_host_messages_classify_like_client_messages() {
        assert!(matches!(Message::Text("{}".to_string()).classify(), Received::Text(t) if t == "{}"));
        assert!(matches!(Message::Binary(b"[]".to_vec()).classify(), Received::Text(t) if t == "[]"));
        assert!(matches!(Message::Pong(Vec::new()).classify(), Received::Skip));
        assert!(matches!(Message::Close(None).classify(), Received::Close));
        assert!(matches!(<Message as WireMessage>::text("x".to_string()), Message::Text(t) if t == "x"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&PendingError::ConnectionClosed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&PendingError::DuplicateId {
                id: RequestId::Number(1)
            }),
            StatusCode::CONFLICT
        );
    }
}
