//! In-process publish/subscribe event bus with persistence.
//!
//! A publish persists the event through the event store first, then fans out
//! to every matching subscriber. If persistence fails no subscriber sees the
//! event, so anything observed live is guaranteed to be queryable via
//! [`EventBus::replay`].
//!
//! Fan-out never blocks the publisher: each subscription owns a bounded
//! queue and events are dropped (with a debug log) when it is full.

pub mod bridge;
pub mod observer;
pub mod subjects;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::BusError;
use crate::store::EventStore;
use crate::store::models::{Event, EventFilter};

/// Minimum queue depth owned by each subscription.
pub const SUBSCRIPTION_BUFFER: usize = 64;

struct Subscriber {
    id: u64,
    pattern: String,
    tx: mpsc::Sender<Event>,
}

struct BusInner {
    events: EventStore,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// The platform event bus. Cheap to clone; all clones share one broker.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(events: EventStore) -> Self {
        Self {
            inner: Arc::new(BusInner {
                events,
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Persist the event, then fan it out to matching subscribers.
    ///
    /// Returns the stored event (with generated id/timestamp filled in).
    /// Fails without notifying anyone when the bus is closed or persistence
    /// fails.
    pub async fn publish(&self, event: &Event) -> Result<Event, BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let stored = self
            .inner
            .events
            .publish(event)
            .await
            .map_err(BusError::Persist)?;

        let subject = subjects::build_subject(
            &stored.scope.org_id,
            &stored.scope.team_id,
            &stored.event_type,
        );

        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|s| !s.tx.is_closed());
        for sub in subscribers.iter() {
            if !subjects::subject_matches(&sub.pattern, &subject) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.tx.try_send(stored.clone()) {
                debug!(
                    subscriber = sub.id,
                    subject = %subject,
                    "subscriber queue full, dropping event"
                );
            }
        }

        Ok(stored)
    }

    /// Register a subscription for the given subject pattern. The
    /// subscription lives until it is dropped or the bus shuts down.
    pub fn subscribe(&self, pattern: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Subscriber {
                id,
                pattern: pattern.to_string(),
                tx,
            });
        Subscription {
            id,
            rx,
            inner: self.inner.clone(),
        }
    }

    /// Stream persisted events matching the filter, in creation order, into
    /// a fresh channel. The channel closes once the query is exhausted.
    /// Replay is independent of live subscription.
    pub async fn replay(&self, filter: EventFilter) -> Result<mpsc::Receiver<Event>, BusError> {
        let events = self
            .inner
            .events
            .query(filter)
            .await
            .map_err(BusError::Persist)?;

        let (tx, rx) = mpsc::channel(events.len().max(1));
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    /// Shut down: cancel all subscriptions and reject further publishes.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// A live subscription. Dropping it cancels the subscription.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    inner: Arc<BusInner>,
}

impl Subscription {
    /// Next event, or `None` once the subscription is canceled or the bus
    /// has shut down and the queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Explicit cancellation; equivalent to dropping.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|s| s.id != self.id);
    }
}
