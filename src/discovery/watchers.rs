//! Ordered observer list shared by backend implementations.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::discovery::{ChangeEvent, UpdateCallback, WatchId};

/// Subscribers of one backend instance, notified in subscription order.
#[derive(Default)]
pub struct Watchers {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(WatchId, UpdateCallback)>>,
    /// Serializes deliveries so every observer sees events in publish order.
    delivery: Mutex<()>,
}

impl Watchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber.
    pub fn subscribe(&self, callback: UpdateCallback) -> WatchId {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.subscribers.write().push((id, callback));
        id
    }

    /// Detach a subscriber. Returns false if it was not attached.
    pub fn unsubscribe(&self, id: WatchId) -> bool {
        let mut subs = self.subscribers.write();
        let before = subs.len();
        subs.retain(|(sub_id, _)| *sub_id != id);
        subs.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one event to every subscriber, synchronously.
    ///
    /// Callbacks run outside the subscriber lock, so they may subscribe or
    /// unsubscribe. They must not publish on the same backend.
    pub fn publish(&self, event: &ChangeEvent) {
        let _delivery = self.delivery.lock();
        let snapshot: Vec<UpdateCallback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }
}
