use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::ProgressEvent;

/// In-process fan-out of [`ProgressEvent`]s
///
/// Every subscriber owns an unbounded channel, so a slow reader never causes
/// another reader to miss or reorder events, and `publish` never waits.
/// Subscribers only see events published after they subscribed; history is
/// available from the job registry instead.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProgressEvent>>>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live subscriber, returning how many got it
    pub fn publish(&self, event: ProgressEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        if subscribers.len() < before {
            debug!(
                dropped = before - subscribers.len(),
                "Pruned closed event subscribers"
            );
        }
        trace!(kind = event.kind(), target = %event.target(), "Event published");

        subscribers.len()
    }

    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        EventStream { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// One subscription to the bus
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl EventStream {
    /// Next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Next already-buffered event without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
