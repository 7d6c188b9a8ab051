//! Configuration update events.

use tokio::sync::broadcast;
use tracing::debug;

/// Events broadcast when the plugin configuration changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdateEvent {
    /// Any setting was saved.
    Updated,
    /// A cache-relevant setting changed; cached catalog data is stale.
    CacheDataVersionChanged { previous: String, current: String },
}

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Broadcaster for configuration update events.
#[derive(Clone)]
pub struct ConfigEventBroadcaster {
    sender: broadcast::Sender<ConfigUpdateEvent>,
}

impl ConfigEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ConfigUpdateEvent) {
        debug!(?event, "Publishing config event");
        let _ = self.sender.send(event);
    }
}

impl Default for ConfigEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
