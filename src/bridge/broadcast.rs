//! Broadcast fan-out to streaming listeners
//!
//! Server-initiated messages are delivered to every attached listener. A
//! listener whose sink refuses a write is detached on the spot; the rest of the
//! broadcast carries on.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::link::InboundHandler;
use crate::mcp::types::JsonRpcMessage;

/// Default per-listener buffer, in frames
pub const DEFAULT_LISTENER_BUFFER: usize = 64;

/// A listener's sink refused a frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("listener sink rejected the frame")]
pub struct SinkError;

/// One-way destination for serialized envelopes
pub trait MessageSink: Send + Sync {
    fn deliver(&self, frame: &str) -> Result<(), SinkError>;
}

/// A full buffer counts as a failed write: a listener that cannot keep up is
/// dropped rather than stalling everyone else.
impl MessageSink for mpsc::Sender<String> {
    fn deliver(&self, frame: &str) -> Result<(), SinkError> {
        self.try_send(frame.to_string()).map_err(|_| SinkError)
    }
}

struct Listener {
    id: Uuid,
    attached_at: DateTime<Utc>,
    sink: Box<dyn MessageSink>,
}

/// Snapshot of an attached listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub id: Uuid,
    pub attached_at: DateTime<Utc>,
}

/// Set of attached listeners
#[derive(Clone)]
pub struct Broadcaster {
    listeners: Arc<Mutex<Vec<Listener>>>,
    buffer: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_LISTENER_BUFFER)
    }
}

impl Broadcaster {
    /// Create a broadcaster whose subscriptions buffer up to `buffer` frames
    pub fn new(buffer: usize) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            buffer: buffer.max(1),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a sink to the active set
    pub fn attach(&self, sink: Box<dyn MessageSink>) -> Uuid {
        let id = Uuid::new_v4();
        let mut listeners = self.listeners();
        listeners.push(Listener {
            id,
            attached_at: Utc::now(),
            sink,
        });
        info!(listener = %id, total = listeners.len(), "Listener attached");
        id
    }

    /// Remove a listener; removing an unknown id is a no-op
    pub fn detach(&self, id: Uuid) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        let removed = listeners.len() != before;
        if removed {
            info!(listener = %id, total = listeners.len(), "Listener detached");
        }
        removed
    }

    /// Attach a buffered channel listener and hand back its receiving end
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.attach(Box::new(tx));
        Subscription {
            id,
            rx,
            broadcaster: self.clone(),
        }
    }

    /// Serialize an envelope and deliver it to every listener
    pub fn broadcast(&self, message: &JsonRpcMessage) -> usize {
        match serde_json::to_string(message) {
            Ok(frame) => self.broadcast_frame(&frame),
            Err(e) => {
                warn!("Failed to serialize broadcast message: {}", e);
                0
            }
        }
    }

    /// Deliver an already-serialized frame to every listener
    ///
    /// Listeners whose write fails are detached. Returns the number of
    /// successful deliveries.
    pub fn broadcast_frame(&self, frame: &str) -> usize {
        let mut listeners = self.listeners();
        if listeners.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        listeners.retain(|listener| match listener.sink.deliver(frame) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(e) => {
                warn!(listener = %listener.id, "Dropping listener: {}", e);
                false
            }
        });
        debug!(delivered, "Broadcast frame");
        delivered
    }

    pub fn len(&self) -> usize {
        self.listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners().is_empty()
    }

    pub fn listeners_info(&self) -> Vec<ListenerInfo> {
        self.listeners()
            .iter()
            .map(|listener| ListenerInfo {
                id: listener.id,
                attached_at: listener.attached_at,
            })
            .collect()
    }
}

#[async_trait]
impl InboundHandler for Broadcaster {
    async fn on_message(&self, _message: JsonRpcMessage, frame: &str) -> Option<JsonRpcMessage> {
        self.broadcast_frame(frame);
        None
    }
}

/// Receiving end of a channel listener; detaches itself when dropped
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<String>,
    broadcaster: Broadcaster,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::RequestId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        attempts: Arc<AtomicUsize>,
    }

    impl MessageSink for FailingSink {
        fn deliver(&self, _frame: &str) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SinkError)
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_listener() {
        let broadcaster = Broadcaster::default();
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        let message = JsonRpcMessage::notification("notifications/message", None);
        assert_eq!(broadcaster.broadcast(&message), 2);

        let expected = serde_json::to_string(&message).unwrap();
        assert_eq!(first.recv().await.unwrap(), expected);
        assert_eq!(second.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_failing_listener_is_removed_without_stopping_delivery() {
        let broadcaster = Broadcaster::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut before = broadcaster.subscribe();
        broadcaster.attach(Box::new(FailingSink {
            attempts: attempts.clone(),
        }));
        let mut after = broadcaster.subscribe();
        assert_eq!(broadcaster.len(), 3);

        assert_eq!(broadcaster.broadcast_frame("{\"a\":1}"), 2);
        assert_eq!(broadcaster.len(), 2);
        assert_eq!(before.recv().await.unwrap(), "{\"a\":1}");
        assert_eq!(after.recv().await.unwrap(), "{\"a\":1}");

        broadcaster.broadcast_frame("{\"a\":2}");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_order_preserved_per_listener() {
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();
        for n in 0..5 {
            broadcaster.broadcast(&JsonRpcMessage::success(RequestId::Number(n), serde_json::json!(n)));
        }
        for n in 0..5 {
            let frame = sub.recv().await.unwrap();
            let message: JsonRpcMessage = serde_json::from_str(&frame).unwrap();
            assert_eq!(message.id, Some(RequestId::Number(n)));
        }
    }

    #[test]
    fn test_detach_is_idempotent() {
        let broadcaster = Broadcaster::default();
        let sub = broadcaster.subscribe();
        let id = sub.id();
        assert!(broadcaster.detach(id));
        assert!(!broadcaster.detach(id));
        drop(sub);
        assert!(broadcaster.is_empty());
    }

    #[test]
    fn test_dropping_subscription_detaches() {
        let broadcaster = Broadcaster::default();
        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.listeners_info().len(), 1);
        drop(sub);
        assert_eq!(broadcaster.len(), 0);
    }

    #[test]
    fn test_full_buffer_drops_listener() {
        let broadcaster = Broadcaster::new(1);
        let _sub = broadcaster.subscribe();
        assert_eq!(broadcaster.broadcast_frame("one"), 1);
        assert_eq!(broadcaster.broadcast_frame("two"), 0);
        assert!(broadcaster.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_handler_forwards_frame_verbatim() {
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();
        let frame = r#"{"method":"notifications/progress","jsonrpc":"2.0"}"#;
        let message: JsonRpcMessage = serde_json::from_str(frame).unwrap();

        assert!(broadcaster.on_message(message, frame).await.is_none());
        assert_eq!(sub.recv().await.unwrap(), frame);
    }
}
