use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// Per-session fan-out of booking, countdown and sync events to SSE subscribers.
pub struct EventHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventHub {
    /// Create a hub whose slowest subscriber may lag `capacity` events before skipping.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver seeing events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Publish to whoever is listening; an empty audience is not an error.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
