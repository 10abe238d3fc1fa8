// ── Event bus ──
//
// In-process fan-out of bridge events. Each subscription owns a bounded
// queue; publishing never waits on a subscriber. A full queue drops the
// event for that subscriber only, a closed queue removes the subscriber,
// and a panicking filter is treated as a non-match.

mod filter;
mod subscription;

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use filter::EventFilter;
pub use subscription::Subscription;

use crate::model::BridgeEvent;

struct Subscriber {
    filter: EventFilter,
    tx: mpsc::Sender<Arc<BridgeEvent>>,
    dropped: Arc<AtomicU64>,
}

pub(crate) struct BusInner {
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

/// Cheaply cloneable handle to the bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose subscriptions buffer up to `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a subscription. Only events published after this call are
    /// delivered; on a closed bus the subscription ends immediately.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        if !self.is_closed() {
            self.inner.subscribers.insert(
                id,
                Subscriber {
                    filter,
                    tx,
                    dropped: Arc::clone(&dropped),
                },
            );
            debug!(subscriber = id, "subscribed");
        }

        Subscription::new(id, rx, dropped, Arc::downgrade(&self.inner))
    }

    /// Remove a subscription. Equivalent to dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner.subscribers.remove(&subscription.id());
        debug!(subscriber = subscription.id(), "unsubscribed");
    }

    /// Deliver `events`, in order, to every matching subscription.
    pub fn publish(&self, events: &[BridgeEvent]) {
        if events.is_empty() || self.is_closed() {
            return;
        }

        let mut gone = Vec::new();
        for event in events {
            let shared = Arc::new(event.clone());
            for entry in &self.inner.subscribers {
                let (id, sub) = entry.pair();
                let matched = panic::catch_unwind(AssertUnwindSafe(|| sub.filter.matches(&shared)))
                    .unwrap_or_else(|_| {
                        warn!(subscriber = id, "subscription filter panicked; event skipped");
                        false
                    });
                if !matched {
                    continue;
                }
                match sub.tx.try_send(Arc::clone(&shared)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let total = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(subscriber = id, dropped = total, "subscriber lagging; event dropped");
                    }
                    Err(TrySendError::Closed(_)) => gone.push(*id),
                }
            }
        }

        for id in gone {
            self.inner.subscribers.remove(&id);
            debug!(subscriber = id, "removed closed subscriber");
        }
    }

    pub fn publish_one(&self, event: BridgeEvent) {
        self.publish(std::slice::from_ref(&event));
    }

    /// Run `handler` for each matching event on its own task.
    ///
    /// Errors and panics from the handler are logged; the task keeps
    /// running until the bus closes or the returned handle is aborted.
    pub fn spawn_handler<F, E>(&self, filter: EventFilter, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(&BridgeEvent) -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let mut subscription = self.subscribe(filter);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(subscriber = subscription.id(), error = %e, "event handler failed");
                    }
                    Err(_) => warn!(subscriber = subscription.id(), "event handler panicked"),
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Release every subscription. Queued events stay readable; receivers
    /// then see end-of-stream.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.subscribers.clear();
            debug!("event bus closed");
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
