//! Subdomain routing table for the relay.
//!
//! Maps each subdomain to the single active control channel serving it.
//! Registration always succeeds; a re-registration silently replaces the
//! previous mapping (last one wins) without closing the old channel.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::channel::ControlChannel;

/// Concurrent subdomain -> channel map. Clones share the same table.
#[derive(Clone, Default)]
pub struct Registry {
    channels: Arc<DashMap<String, ControlChannel>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the mapping for a subdomain. Returns the channel
    /// that was displaced, if any; the caller decides what to log. The old
    /// channel keeps running until its own connection closes.
    pub fn register(&self, subdomain: String, channel: ControlChannel) -> Option<ControlChannel> {
        self.channels.insert(subdomain, channel)
    }

    /// Look up the currently mapped channel for a subdomain.
    pub fn lookup(&self, subdomain: &str) -> Option<ControlChannel> {
        self.channels.get(subdomain).map(|entry| entry.value().clone())
    }

    /// Remove the mapping only if it still points at `channel`. A stale
    /// channel's disconnect must not evict a newer registration that
    /// replaced it; channel identity settles that race. Returns whether a
    /// removal occurred.
    pub fn remove_if_current(&self, subdomain: &str, channel: &ControlChannel) -> bool {
        let removed = self
            .channels
            .remove_if(subdomain, |_, current| current.id() == channel.id())
            .is_some();
        if !removed {
            debug!(
                "channel {} for '{}' was already replaced or removed",
                channel.id(),
                subdomain
            );
        }
        removed
    }

    /// Number of active tunnels, for logging.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
