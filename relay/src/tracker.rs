//! Correlation of forwarded requests with client responses.
//!
//! Responses arrive asynchronously and in arbitrary order relative to the
//! requests that prompted them, with any number of exchanges in flight on
//! one channel. Each exchange carries an explicit correlation id; matching
//! by request URL would conflate concurrent requests to the same path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use passage_shared::protocol::Headers;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// The client's answer to one forwarded request, as delivered to the
/// waiting ingress task. `body` is still in its base64 transport form.
#[derive(Debug, Clone)]
pub struct ExchangeReply {
    pub status_code: u16,
    pub headers: Headers,
    pub body: String,
}

/// Pending-exchange table for one control channel. An id is fulfilled by
/// whichever call removes its entry, so resolve, cancel_all, and release
/// are exactly-once by construction.
#[derive(Clone, Default)]
pub struct CorrelationTracker {
    pending: Arc<DashMap<String, oneshot::Sender<ExchangeReply>>>,
    next_id: Arc<AtomicU64>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a correlation id. Unique per in-flight exchange on this
    /// channel for the life of the process.
    pub fn next_id(&self) -> String {
        format!("c{:x}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create the pending slot for an exchange and hand back the half the
    /// ingress task awaits.
    pub fn register(&self, id: &str) -> oneshot::Receiver<ExchangeReply> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.to_string(), tx);
        rx
    }

    /// Fulfill the exchange matching `id`. A late, duplicate, or spurious
    /// id is dropped and logged, never fatal. Returns whether a waiter
    /// received the reply.
    pub fn resolve(&self, id: &str, reply: ExchangeReply) -> bool {
        match self.pending.remove(id) {
            Some((_, tx)) => {
                if tx.send(reply).is_err() {
                    // Waiter gave up (timed out) between removal and send.
                    debug!("exchange {} resolved after its waiter left", id);
                    return false;
                }
                true
            }
            None => {
                warn!("dropping response for unknown exchange {}", id);
                false
            }
        }
    }

    /// Abandon a slot the ingress no longer waits on (timeout or a send
    /// that never went out), so the table cannot leak entries.
    pub fn release(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Drain every pending slot. Dropping the senders wakes each waiting
    /// ingress task immediately with a channel-loss failure. Called by the
    /// connection pump when the channel dies. Returns how many exchanges
    /// were cancelled, for logging.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
