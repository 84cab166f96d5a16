//! Connection manager for the dialing side of the persistent channel
//!
//! Keeps a [`Link`] attached to its counterpart: dials through a
//! [`Connector`], sends the `initialize` handshake on every new connection,
//! and retries at a fixed interval after failures or disconnects.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::link::{ConnectionState, FrameChannel, Link};
use crate::error::{PendingError, Result};
use crate::mcp::router::{SERVER_NAME, SERVER_VERSION};
use crate::mcp::types::{ClientInfo, InitializeParams, JsonRpcMessage, RequestId, MCP_VERSION, methods};

/// Opens a fresh channel to the counterpart
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<FrameChannel>;

    /// Where this connector dials, for logs
    fn describe(&self) -> String {
        "counterpart".to_string()
    }
}

/// Reconnect schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before every retry
    pub interval: Duration,

    /// Retries allowed after a failure; 0 retries forever
    pub max_attempts: u32,

    /// Timeout for the `initialize` handshake and other manager-issued requests
    pub request_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            max_attempts: 0,
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct Shared {
    link: Arc<Link>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    attempt: AtomicU32,
    next_handshake: AtomicU64,
    shutdown: CancellationToken,
}

/// Owns the reconnect loop of one link
pub struct ConnectionManager {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(link: Arc<Link>, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                link,
                connector,
                policy,
                attempt: AtomicU32::new(0),
                next_handshake: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.shared.link
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.state()
    }

    /// Retries scheduled since the last successful connect
    pub fn attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// Whether the reconnect loop is still running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Begin dialing
    ///
    /// No-op while the loop is already running and after [`stop`](Self::stop).
    pub fn start(&self) {
        if self.shared.shutdown.is_cancelled() {
            warn!("Connection manager is shut down; ignoring start");
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        self.shared.attempt.store(0, Ordering::SeqCst);
        *task = Some(tokio::spawn(self.shared.clone().run()));
    }

    /// Cancel any pending retry, close the channel and enter `ShutDown`
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        self.shared.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Connection task ended abnormally: {}", e);
            }
        }
        self.shared.link.close();
    }

    /// Send a request over the link and wait for its reply
    pub async fn request(&self, method: &str, params: Option<Value>) -> std::result::Result<Value, PendingError> {
        let id = RequestId::String(format!(
            "bridge-{}",
            self.shared.next_handshake.fetch_add(1, Ordering::Relaxed)
        ));
        self.shared
            .link
            .request(
                JsonRpcMessage::request(id, method, params),
                self.shared.policy.request_timeout,
            )
            .await
    }
}

impl Shared {
    async fn run(self: Arc<Self>) {
        let target = self.connector.describe();
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.link.set_state(ConnectionState::Connecting);
            info!(%target, "Connecting");
            let connected = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(FrameChannel { outgoing, incoming }) => {
                    let session = self.link.attach(outgoing);
                    self.attempt.store(0, Ordering::SeqCst);
                    info!(%target, "Connected");
                    self.spawn_handshake();

                    if self.link.serve(session, incoming, &self.shutdown).await {
                        break;
                    }
                    warn!(%target, "Connection closed");
                }
                Err(e) => {
                    warn!(%target, "Connection attempt failed: {}", e);
                    self.link.set_state(ConnectionState::Disconnected);
                }
            }

            let max = self.policy.max_attempts;
            if max > 0 && self.attempt.load(Ordering::SeqCst) >= max {
                error!(%target, "Max reconnect attempts reached ({})", max);
                return;
            }
            let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                "Reconnecting in {}ms (attempt {})",
                self.policy.interval.as_millis(),
                attempt
            );

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }
        self.link.set_state(ConnectionState::ShutDown);
    }

    /// Announce ourselves on a fresh connection without blocking frame
    /// processing on the answer
    fn spawn_handshake(&self) {
        let params = InitializeParams {
            protocol_version: MCP_VERSION.to_string(),
            client_info: ClientInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: Value::Object(Default::default()),
        };
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!("Failed to build initialize params: {}", e);
                return;
            }
        };
        let id = RequestId::String(format!(
            "bridge-{}",
            self.next_handshake.fetch_add(1, Ordering::Relaxed)
        ));
        let message = JsonRpcMessage::request(id, methods::INITIALIZE, Some(params));
        let link = self.link.clone();
        let timeout = self.policy.request_timeout;

        tokio::spawn(async move {
            match link.request(message, timeout).await {
                Ok(result) => {
                    info!(
                        server = %result["serverInfo"]["name"],
                        "Counterpart acknowledged initialize"
                    );
                    if let Err(e) = link.send(&JsonRpcMessage::notification(methods::INITIALIZED, None)) {
                        debug!("Could not confirm initialization: {}", e);
                    }
                }
                // A relay forwards the handshake to its listeners and never
                // answers it.
                Err(e) => debug!("Initialize was not acknowledged: {}", e),
            }
        });
    }
}
