use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-user event delivery. This is the `notify(event,
/// userId, context)` seam: delivery is fire-and-forget and a failed or
/// missing subscriber never affects the committed state change.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events addressed to a user. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening; lagging receivers
    /// drop events rather than blocking the sender.
    pub fn send(&self, user_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&user_id) {
            if sender.send(event.clone()).is_err() {
                tracing::debug!("no live subscriber for user {user_id}");
            }
        }
    }

    /// Remove a channel (e.g. when a user is deactivated).
    pub fn remove(&self, user_id: &Ulid) {
        self.channels.remove(user_id);
    }
}
