//! One persistent message channel to a counterpart process
//!
//! A link owns the outbound half of the current channel, the correlation
//! table for requests sent over it, and the classification of inbound frames:
//! replies to a pending request settle that request, everything else goes to
//! the link's [`InboundHandler`]. Dropping a channel rejects every pending
//! request with `ConnectionClosed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::correlation::CorrelationTable;
use crate::error::PendingError;
use crate::mcp::types::{JsonRpcError, JsonRpcMessage};

/// Lifecycle of the persistent channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ShutDown,
}

/// Receives inbound envelopes that do not answer a pending request
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// `frame` is the envelope's text exactly as received. A returned
    /// envelope is written back on the same channel.
    async fn on_message(&self, message: JsonRpcMessage, frame: &str) -> Option<JsonRpcMessage>;
}

/// Text frames in both directions of a channel
pub struct FrameChannel {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

impl FrameChannel {
    /// Two in-memory channel ends wired to each other
    pub fn pair() -> (FrameChannel, FrameChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            FrameChannel {
                outgoing: a_tx,
                incoming: b_rx,
            },
            FrameChannel {
                outgoing: b_tx,
                incoming: a_rx,
            },
        )
    }
}

struct Outbound {
    session: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Shared core of a persistent channel
pub struct Link {
    pending: CorrelationTable,
    handler: Arc<dyn InboundHandler>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<Outbound>>,
    next_session: AtomicU64,
}

impl Link {
    pub fn new(handler: Arc<dyn InboundHandler>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            pending: CorrelationTable::new(),
            handler,
            state,
            outbound: Mutex::new(None),
            next_session: AtomicU64::new(1),
        }
    }

    fn outbound(&self) -> MutexGuard<'_, Option<Outbound>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn pending(&self) -> &CorrelationTable {
        &self.pending
    }

    /// Move to `state`; `ShutDown` is terminal and never left
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::ShutDown || *current == state {
                return false;
            }
            debug!(from = ?*current, to = ?state, "Connection state change");
            *current = state;
            true
        });
    }

    /// Make `tx` the outbound channel and enter `Connected`
    ///
    /// A channel that was already attached is replaced; requests sent over it
    /// can no longer be answered and are rejected.
    pub fn attach(&self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let replaced = self.outbound().replace(Outbound { session, tx });
        if let Some(old) = replaced {
            info!(old = old.session, new = session, "Replacing existing channel");
            self.pending.reject_all(PendingError::ConnectionClosed);
        }
        self.set_state(ConnectionState::Connected);
        session
    }

    /// Drop the channel of `session` if it is still the current one
    ///
    /// Rejects every pending request and enters `Disconnected`.
    pub fn detach(&self, session: u64) -> bool {
        let removed = {
            let mut outbound = self.outbound();
            match outbound.as_ref() {
                Some(current) if current.session == session => outbound.take(),
                _ => None,
            }
        };
        if removed.is_none() {
            return false;
        }
        let rejected = self.pending.reject_all(PendingError::ConnectionClosed);
        if rejected > 0 {
            warn!(rejected, "Connection closed with requests in flight");
        }
        self.set_state(ConnectionState::Disconnected);
        true
    }

    /// Drop any channel, reject pending requests and enter `ShutDown`
    pub fn close(&self) {
        let removed = self.outbound().take();
        if removed.is_some() {
            debug!("Closing channel");
        }
        self.pending.reject_all(PendingError::ConnectionClosed);
        self.set_state(ConnectionState::ShutDown);
    }

    /// Write a serialized envelope to the current channel
    pub fn send_frame(&self, frame: String) -> Result<(), PendingError> {
        let outbound = self.outbound();
        let Some(current) = outbound.as_ref() else {
            return Err(PendingError::ConnectionClosed);
        };
        current
            .tx
            .send(frame)
            .map_err(|_| PendingError::ConnectionClosed)
    }

    /// Serialize and write an envelope without expecting a reply
    pub fn send(&self, message: &JsonRpcMessage) -> Result<(), PendingError> {
        let frame = serde_json::to_string(message)
            .map_err(|e| PendingError::Remote(JsonRpcError::internal_error(e.to_string())))?;
        debug!(%frame, "Sending frame");
        self.send_frame(frame)
    }

    /// Send a request and wait for its correlated reply
    ///
    /// Fails immediately with `ConnectionClosed` when no channel is attached;
    /// nothing is queued for a later connection. Envelopes without an id are
    /// sent as-is and resolve to `null`.
    pub async fn request(&self, message: JsonRpcMessage, timeout: Duration) -> Result<Value, PendingError> {
        let Some(id) = message.id.clone() else {
            self.send(&message)?;
            return Ok(Value::Null);
        };
        if !self.is_connected() {
            return Err(PendingError::ConnectionClosed);
        }

        let handle = self.pending.register(id.clone(), timeout)?;
        if let Err(e) = self.send(&message) {
            self.pending.reject(&id, e.clone());
            return Err(e);
        }
        handle.wait().await
    }

    /// Classify and route one inbound frame
    ///
    /// Unparseable frames are logged and dropped; the channel stays open.
    pub async fn handle_frame(&self, frame: &str) {
        let message: JsonRpcMessage = match serde_json::from_str(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparseable frame: {}", e);
                return;
            }
        };
        debug!(%frame, "Received frame");

        if message.is_reply() {
            if let Some(id) = message.id.as_ref() {
                let settled = match message.error.as_ref() {
                    Some(error) => self.pending.reject(id, PendingError::Remote(error.clone())),
                    None => self
                        .pending
                        .resolve(id, message.result.clone().unwrap_or(Value::Null)),
                };
                if settled {
                    return;
                }
            }
        }

        if let Some(reply) = self.handler.on_message(message, frame).await {
            if let Err(e) = self.send(&reply) {
                warn!("Failed to send reply: {}", e);
            }
        }
    }

    /// Process inbound frames of `session` until the channel ends or
    /// `shutdown` fires, then detach it
    ///
    /// Frames are handled one at a time, in arrival order. Returns `true`
    /// when stopped by `shutdown`.
    pub async fn serve(
        &self,
        session: u64,
        mut incoming: mpsc::UnboundedReceiver<String>,
        shutdown: &CancellationToken,
    ) -> bool {
        let stopped = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break true,
                frame = incoming.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame).await,
                    None => break false,
                },
            }
        };
        self.detach(session);
        stopped
    }
}
