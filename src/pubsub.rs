//! Ephemeral pub/sub (component D): non-durable, fire-and-forget channels
//! keyed by strings of the form `user:<user-id>`.
//!
//! Grounded in the reference service's presence/typing trackers
//! (`Arc<RwLock<HashMap<key, ...>>>` registries keyed by room/sender) and its
//! single global `tokio::sync::broadcast`-backed `EventBus`, generalized
//! here into one broadcast channel per key instead of one global channel.

use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

pub struct PubSub {
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn channel_for_user(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    /// Publish `payload` on `channel`. Returns the number of live
    /// subscribers that received it; `0` means nobody was listening.
    pub fn publish(&self, channel: &str, payload: Vec<u8>) -> usize {
        let channels = self.channels.read().unwrap();
        match channels.get(channel) {
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to `channel`, creating it if this is the first subscriber.
    /// The returned receiver only sees messages published after this call.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        {
            let channels = self.channels.read().unwrap();
            if let Some(tx) = channels.get(channel) {
                return tx.subscribe();
            }
        }
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}
