//! A broadcast bus for change events.
//!
//! Thin wrapper over `tokio::sync::broadcast` that tolerates having no
//! subscribers and keeps the subscription API in one place.

use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

pub struct Bus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> Bus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Bus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: E) {
        // An error here only means nobody is listening right now.
        _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for Bus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus: Bus<u32> = Bus::new();
        bus.publish(1);

        let mut rx = bus.subscribe();
        bus.publish(2);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus: Bus<u32> = Bus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(7);
        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.recv().await.unwrap(), 7);
    }
}
