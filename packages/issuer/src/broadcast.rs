use common::BatchEvent;
use common::event::Event;
use tokio::sync::broadcast;

/// Fan-out of batch progress to every connected listener.
///
/// Delivery is best-effort: publishing with no subscribers is a no-op, and a
/// subscriber that falls more than `capacity` events behind sees a lag error
/// on its receiver instead of blocking the run.
#[derive(Clone, Debug)]
pub struct Broadcaster {
    tx: broadcast::Sender<BatchEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: BatchEvent) {
        tracing::trace!(topic = event.topic(), batch_id = %event.batch_id(), "Publishing batch event");
        // Err only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    /// Events published after this call, in publish order.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
