// SPDX-License-Identifier: MIT

//! Engine event fan-out.
//!
//! Each subscriber owns a bounded queue; emission is synchronous and
//! never blocks on a slow subscriber. On overflow the oldest event is
//! dropped and the subscription is marked lagging. Fan-out iterates a
//! snapshot of the subscriber set taken under the lock, so a subscriber
//! added or dropped mid-emit never corrupts the set.

use parking_lot::Mutex;
use ralph_core::EngineEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Default per-subscriber queue capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

struct SubscriberQueue {
    events: Mutex<VecDeque<EngineEvent>>,
    notify: Notify,
    capacity: usize,
    lagging: AtomicBool,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn push(&self, event: EngineEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
            if !self.lagging.swap(true, Ordering::Relaxed) {
                warn!(capacity = self.capacity, "subscriber lagging, dropping oldest event");
            }
        }
        events.push_back(event);
        drop(events);
        self.notify.notify_one();
    }
}

/// Fan-out bus for engine events.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Arc<SubscriberQueue>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the default queue capacity.
    pub fn subscribe(&self) -> EventSubscription {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Register a subscriber with an explicit queue capacity.
    pub fn subscribe_with_capacity(&self, capacity: usize) -> EventSubscription {
        let queue = Arc::new(SubscriberQueue {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            lagging: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.subscribers.lock().push(Arc::clone(&queue));
        EventSubscription { queue }
    }

    /// Deliver an event to every live subscriber, in registration order.
    pub fn emit(&self, event: &EngineEvent) {
        let snapshot: Vec<_> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|q| !q.closed.load(Ordering::Relaxed));
            subscribers.clone()
        };
        for queue in snapshot {
            queue.push(event.clone());
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|q| !q.closed.load(Ordering::Relaxed));
        subscribers.len()
    }
}

/// Receiving half of a subscription.
///
/// Dropping or closing the subscription stops new deliveries; events
/// already queued can still be drained.
pub struct EventSubscription {
    queue: Arc<SubscriberQueue>,
}

impl EventSubscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is closed and the queue is
    /// drained.
    pub async fn recv(&self) -> Option<EngineEvent> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Pop the next queued event without waiting.
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.queue.events.lock().pop_front()
    }

    /// Whether this subscription has dropped events.
    pub fn is_lagging(&self) -> bool {
        self.queue.lagging.load(Ordering::Relaxed)
    }

    /// Stop receiving new events; queued events remain drainable.
    pub fn close(&self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.notify.notify_one();
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
