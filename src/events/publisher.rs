//! Broadcast fan-out of job lifecycle events.
//!
//! The durable record is the repository's event log; this channel is the
//! ephemeral notification layer on top of it, feeding status streams and
//! test observers. Slow subscribers lag and drop, they never block the
//! orchestrator.

use crate::models::JobEvent;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: JobEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a lifecycle event. A send with no subscribers is fine; the
    /// durable log already holds the event.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(PublishedEvent {
            event,
            published_at: chrono::Utc::now(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
