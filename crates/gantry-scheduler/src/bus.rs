//! In-process event bus backed by a tokio broadcast channel.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::events::Event;
use gantry_core::ports::EventBus;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out event bus for local subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        let subject = event.subject();
        // No subscribers is not an error
        match self.tx.send(event) {
            Ok(receivers) => trace!(%subject, receivers, "Published event"),
            Err(_) => trace!(%subject, "Published event with no subscribers"),
        }
        Ok(())
    }
}
