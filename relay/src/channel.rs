//! Control channel handle for one registered client connection.

use std::sync::atomic::{AtomicU64, Ordering};

use passage_shared::protocol::Frame;
use passage_shared::{Error, Result};
use tokio::sync::mpsc;

use crate::tracker::CorrelationTracker;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one client's control connection. Cheap to clone; all clones
/// share the outbound queue and the correlation tracker. The receive half
/// of the connection is driven by the listener task that created this
/// channel, and that task's exit is the only cancellation signal.
#[derive(Clone)]
pub struct ControlChannel {
    id: u64,
    subdomain: String,
    tx: mpsc::Sender<Frame>,
    tracker: CorrelationTracker,
}

impl ControlChannel {
    pub fn new(subdomain: String, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            subdomain,
            tx,
            tracker: CorrelationTracker::new(),
        }
    }

    /// Process-unique identity, used by the registry to tell a stale
    /// channel apart from its replacement.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The subdomain this channel serves, fixed at registration.
    pub fn subdomain(&self) -> &str {
        &self.subdomain
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    /// Queue a frame for the client. Fails once the connection's pump has
    /// shut down and dropped the receive side.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| Error::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (tx, rx) = mpsc::channel(1);
        let channel = ControlChannel::new("foo".into(), tx);
        drop(rx);
        assert!(matches!(
            channel.send(Frame::Register { subdomain: "x".into() }).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[test]
    fn test_ids_are_unique() {
        let (tx, _rx) = mpsc::channel(1);
        let a = ControlChannel::new("a".into(), tx.clone());
        let b = ControlChannel::new("b".into(), tx);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.subdomain(), "a");
    }
}
