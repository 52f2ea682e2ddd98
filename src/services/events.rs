//! Observer channel for a stat's sync engine.

use crate::models::status::SyncStatus;
use std::sync::mpsc::{self, Receiver, Sender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Point values changed; redraw from the stat.
    DataUpdated,
    StatusUpdated(SyncStatus),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SubscriberId(u64);

#[derive(Debug, Default)]
pub struct EventBus {
    next_id: u64,
    subscribers: Vec<(SubscriberId, Sender<SyncEvent>)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> (SubscriberId, Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel();
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.subscribers.push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Deliver to every subscriber. Subscribers whose receiver is gone are dropped.
    pub fn emit(&mut self, event: SyncEvent) {
        self.subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_all_subscribers_in_order() {
        let mut bus = EventBus::new();
        let (_, a) = bus.subscribe();
        let (_, b) = bus.subscribe();

        bus.emit(SyncEvent::StatusUpdated(SyncStatus::Ok));
        bus.emit(SyncEvent::DataUpdated);

        let got: Vec<_> = a.try_iter().collect();
        assert_eq!(got, vec![SyncEvent::StatusUpdated(SyncStatus::Ok), SyncEvent::DataUpdated]);
        assert_eq!(b.try_iter().count(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = EventBus::new();
        let (id, rx) = bus.subscribe();
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(!bus.has_subscribers());
        bus.emit(SyncEvent::DataUpdated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut bus = EventBus::new();
        let (_, rx) = bus.subscribe();
        drop(rx);
        assert!(bus.has_subscribers());
        bus.emit(SyncEvent::DataUpdated);
        assert!(!bus.has_subscribers());
    }
}
