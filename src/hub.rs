//! Broadcast fan-out used by engines and the coordinator to publish transitions.

use tokio::sync::broadcast;

/// Default channel capacity for event hubs.
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Simple broadcast hub so a surrounding system can observe transitions.
pub struct EventHub<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventHub<T> {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: T) {
        let _ = self.sender.send(event);
    }
}

impl<T: Clone> Default for EventHub<T> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
