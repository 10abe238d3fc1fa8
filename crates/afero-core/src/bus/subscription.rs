// ── Subscription handle ──

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;

use super::BusInner;
use crate::model::BridgeEvent;

/// A live registration on the [`EventBus`](super::EventBus).
///
/// Events arrive in publish order. Dropping the handle unsubscribes.
/// Also usable as a `Stream` with `StreamExt` combinators.
///
/// Each subscription buffers up to the bus capacity
/// (`BridgeConfig::subscriber_capacity`). Delivery is lossless while the
/// consumer keeps up; once the buffer is full, further events for this
/// subscription only are discarded and counted in
/// [`dropped`](Self::dropped). Publishers never wait. A consumer that
/// cannot afford gaps should check `dropped` and resynchronize from the
/// registry snapshot.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<BridgeEvent>>,
    dropped: Arc<AtomicU64>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub(super) fn new(
        id: u64,
        rx: mpsc::Receiver<Arc<BridgeEvent>>,
        dropped: Arc<AtomicU64>,
        bus: Weak<BusInner>,
    ) -> Self {
        Self {
            id,
            rx,
            dropped,
            bus,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the bus is closed and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<BridgeEvent>> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<BridgeEvent>> {
        self.rx.try_recv().ok()
    }

    /// Events discarded because this subscription's queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Stream for Subscription {
    type Item = Arc<BridgeEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}
