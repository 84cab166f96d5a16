//! Correlation table for in-flight requests
//!
//! Each outstanding request owns a single-use result slot keyed by its id.
//! The slot is fulfilled exactly once: by a reply, by a rejection, or by the
//! per-entry timeout, whichever comes first. Every terminal transition removes
//! the entry, so the table only ever holds live requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::PendingError;
use crate::mcp::types::RequestId;

/// Final outcome delivered to a waiting caller
pub type Outcome = Result<Value, PendingError>;

struct PendingRequest {
    /// Distinguishes reuses of the same id so a stale timer cannot expire a
    /// newer entry
    seq: u64,
    created_at: Instant,
    deadline: Instant,
    slot: oneshot::Sender<Outcome>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Entries {
    pending: HashMap<RequestId, PendingRequest>,
    next_seq: u64,
}

/// Table of in-flight requests awaiting a correlated reply
#[derive(Clone, Default)]
pub struct CorrelationTable {
    inner: Arc<Mutex<Entries>>,
}

/// Caller side of a pending request
#[derive(Debug)]
pub struct PendingHandle {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingHandle {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the request's single outcome
    pub async fn wait(self) -> Outcome {
        // The sender only disappears without a value if the table itself is
        // dropped, which means the channel is gone.
        self.rx.await.unwrap_or(Err(PendingError::ConnectionClosed))
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a new request that expires after `timeout`
    ///
    /// Fails with `DuplicateId` while another request with the same id is live.
    pub fn register(&self, id: RequestId, timeout: Duration) -> Result<PendingHandle, PendingError> {
        let mut entries = self.entries();
        if entries.pending.contains_key(&id) {
            return Err(PendingError::DuplicateId { id });
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;

        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let (slot, rx) = oneshot::channel();

        let table = Arc::downgrade(&self.inner);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            expire(table, &timer_id, seq, timeout);
        });

        entries.pending.insert(
            id.clone(),
            PendingRequest {
                seq,
                created_at,
                deadline,
                slot,
                timer,
            },
        );

        Ok(PendingHandle { id, rx })
    }

    /// Fulfil a pending request with a value
    ///
    /// Unknown ids (already settled, timed out, never registered) are ignored.
    /// Returns whether an entry was settled.
    pub fn resolve(&self, id: &RequestId, value: Value) -> bool {
        self.settle(id, Ok(value))
    }

    /// Fail a pending request; unknown ids are ignored
    pub fn reject(&self, id: &RequestId, error: PendingError) -> bool {
        self.settle(id, Err(error))
    }

    /// Fail every pending request and empty the table
    pub fn reject_all(&self, error: PendingError) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = self.entries().pending.drain().collect();
        let count = drained.len();
        for (id, request) in drained {
            request.timer.abort();
            debug!(%id, "Rejecting pending request: {}", error);
            let _ = request.slot.send(Err(error.clone()));
        }
        count
    }

    fn settle(&self, id: &RequestId, outcome: Outcome) -> bool {
        let Some(request) = self.entries().pending.remove(id) else {
            debug!(%id, "No pending request; ignoring outcome");
            return false;
        };
        request.timer.abort();
        debug!(
            %id,
            elapsed_ms = request.created_at.elapsed().as_millis() as u64,
            "Settled pending request"
        );
        // The caller may have stopped waiting; the entry is gone either way.
        let _ = request.slot.send(outcome);
        true
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries().pending.contains_key(id)
    }

    /// Deadline of a live entry
    pub fn deadline(&self, id: &RequestId) -> Option<Instant> {
        self.entries().pending.get(id).map(|request| request.deadline)
    }

    pub fn len(&self) -> usize {
        self.entries().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().pending.is_empty()
    }
}

fn expire(table: Weak<Mutex<Entries>>, id: &RequestId, seq: u64, after: Duration) {
    let Some(inner) = table.upgrade() else {
        return;
    };
    let request = {
        let mut entries = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.pending.get(id) {
            Some(request) if request.seq == seq => entries.pending.remove(id),
            _ => None,
        }
    };
    if let Some(request) = request {
        debug!(%id, "Pending request timed out");
        let _ = request.slot.send(Err(PendingError::Timeout {
            id: id.clone(),
            after,
        }));
    }
}
