/// Event bus for pub/sub delivery of detection events
///
/// Every subscriber gets its own unbounded channel. Publishing never blocks
/// the detection loop; subscribers whose receiver was dropped are pruned on
/// the next publish.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use super::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

struct Subscriber {
    id: SubscriberId,
    sender: Sender<Event>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events, returns a receiver and subscription ID
    pub fn subscribe(&self) -> (Receiver<Event>, SubscriberId) {
        let (tx, rx) = unbounded();
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber { id, sender: tx });
        (rx, id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    /// Deliver `event` to every live subscriber
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: &Event) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for subscriber in self.subscribers.read().iter() {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Disconnected(_)) => closed.push(subscriber.id),
                Err(TrySendError::Full(_)) => {}
            }
        }
        if !closed.is_empty() {
            self.subscribers.write().retain(|s| !closed.contains(&s.id));
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn clear(&self) {
        self.subscribers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event::hit(1, "redness_rois", 0.5)
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        let (_rx, id) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let (rx1, _) = bus.subscribe();
        let (rx2, _) = bus.subscribe();

        assert_eq!(bus.publish(&sample()), 2);
        assert_eq!(rx1.try_recv().unwrap(), sample());
        assert_eq!(rx2.try_recv().unwrap(), sample());
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let bus = EventBus::new();
        let (rx, _) = bus.subscribe();
        let (live, _) = bus.subscribe();
        drop(rx);

        assert_eq!(bus.publish(&sample()), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(live.try_recv().is_ok());
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();
        let (_rx, _) = bus1.subscribe();
        assert_eq!(bus2.subscriber_count(), 1);
        bus2.clear();
        assert_eq!(bus1.subscriber_count(), 0);
    }
}
