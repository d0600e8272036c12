//! Fan-out of newly discovered slots and location health to live subscribers.
//!
//! ```text
//! WatchScheduler:
//!   publish(slot) / publish_status(status) -> push into every subscriber queue [non-blocking]
//!                          ↓
//! Push connection task:
//!   Subscription::recv().await -> send JSON frame to client
//! ```
//!
//! Each subscriber owns a bounded queue. When it is full the oldest message
//! is dropped and the subscriber's missed counter goes up, so a slow client
//! never holds back publishing or other clients. The latest status of every
//! location is kept so new subscribers can be told how the watch is doing.
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;
use tracing::trace;

use crate::metrics::CONNECTED_SUBSCRIBERS;
use crate::metrics::MISSED_NOTIFICATIONS;
use crate::AppointmentSlot;
use crate::LocationStatus;

/// One frame of the push channel, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushMessage {
    /// A slot that just appeared
    Slot(AppointmentSlot),
    /// Health of one location after it changed
    Status(LocationStatus),
}

/// Message delivered to subscribers; shared between all queues
pub type HubMessage = Arc<PushMessage>;

#[derive(Debug)]
struct SubscriberQueue {
    messages: Mutex<VecDeque<HubMessage>>,
    notify: Notify,
    missed: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            missed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Returns true when an older message had to be dropped
    fn push(
        &self,
        message: HubMessage,
    ) -> bool {
        let dropped = {
            let mut messages = self.messages.lock();
            let dropped = if messages.len() >= self.capacity {
                messages.pop_front();
                true
            } else {
                false
            };
            messages.push_back(message);
            dropped
        };
        if dropped {
            self.missed.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[derive(Debug)]
struct HubInner {
    subscribers: DashMap<u64, Arc<SubscriberQueue>>,
    next_id: AtomicU64,
    buffer_size: usize,
    closed: AtomicBool,
    published: AtomicU64,
    statuses: DashMap<String, LocationStatus>,
}

impl HubInner {
    fn unsubscribe(
        &self,
        id: u64,
    ) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, queue)) => {
                queue.close();
                CONNECTED_SUBSCRIBERS.dec();
                trace!(subscriber_id = id, "subscriber removed");
                true
            }
            None => false,
        }
    }
}

/// Cloneable handle to the shared subscriber registry
#[derive(Debug, Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer_size: buffer_size.max(1),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                statuses: DashMap::new(),
            }),
        }
    }

    /// Delivers `slot` to every current subscriber without waiting
    pub fn publish(
        &self,
        slot: &AppointmentSlot,
    ) {
        if self.is_closed() {
            return;
        }
        self.broadcast(Arc::new(PushMessage::Slot(slot.clone())));
        self.inner.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `status` as the latest for its location and delivers it
    pub fn publish_status(
        &self,
        status: LocationStatus,
    ) {
        if self.is_closed() {
            return;
        }
        self.inner
            .statuses
            .insert(status.location.clone(), status.clone());
        self.broadcast(Arc::new(PushMessage::Status(status)));
    }

    /// Latest published status of every location, ordered by location
    pub fn statuses(&self) -> Vec<LocationStatus> {
        let mut statuses: Vec<LocationStatus> = self
            .inner
            .statuses
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        statuses.sort_by(|a, b| a.location.cmp(&b.location));
        statuses
    }

    fn broadcast(
        &self,
        message: HubMessage,
    ) {
        for entry in self.inner.subscribers.iter() {
            if entry.value().push(message.clone()) {
                MISSED_NOTIFICATIONS.inc();
            }
        }
    }

    /// Registers a subscriber; it only sees messages published from now on
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.buffer_size));

        if self.is_closed() {
            queue.close();
        } else {
            self.inner.subscribers.insert(id, queue.clone());
            CONNECTED_SUBSCRIBERS.inc();
            trace!(subscriber_id = id, "subscriber added");
        }

        Subscription {
            id,
            queue,
            hub: self.inner.clone(),
        }
    }

    /// Removes subscriber `id`; its pending messages can still be drained
    pub fn unsubscribe(
        &self,
        id: u64,
    ) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Stops delivery and wakes every subscriber
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let ids: Vec<u64> = self.inner.subscribers.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.inner.unsubscribe(id);
        }
        debug!("notification hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Slots published so far; status updates are not counted
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

/// Receiving end of one subscriber; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    hub: Arc<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Messages dropped because this subscriber fell behind
    pub fn missed(&self) -> u64 {
        self.queue.missed.load(Ordering::Relaxed)
    }

    /// Next message in publish order, or `None` once closed and drained
    pub async fn recv(&mut self) -> Option<HubMessage> {
        let queue = self.queue.clone();
        loop {
            // register interest before checking so a push in between is not lost
            let notified = queue.notify.notified();
            let next = queue.messages.lock().pop_front();
            if next.is_some() {
                return next;
            }
            if queue.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&mut self) -> Option<HubMessage> {
        self.queue.messages.lock().pop_front()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
