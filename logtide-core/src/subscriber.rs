//! Subscriber fan-out with per-subscriber bounded queues
//!
//! Used by both the configuration manager and the replicated state
//! machine engine to deliver state-change events. Delivery is in-order
//! and at-least-once per subscriber. A slow subscriber never blocks the
//! commit path or its peers: each subscriber has a bounded queue, and
//! one that overflows is disconnected. Callers must tolerate
//! disconnection and re-subscribe (re-reading current state first).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// Receiving side of a subscription
pub struct Subscription<E> {
    id: u64,
    rx: mpsc::Receiver<E>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, in publication order. `None` means the subscription
    /// was disconnected (overflow or registry shutdown).
    pub async fn next(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Non-blocking variant of `next`.
    pub fn try_next(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}

/// Registry of active subscribers
pub struct SubscriberRegistry<E> {
    senders: Mutex<HashMap<u64, mpsc::Sender<E>>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl<E: Clone> SubscriberRegistry<E> {
    pub fn new(queue_depth: usize) -> Self {
        SubscriberRegistry {
            senders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.senders.lock().expect("registry mutex poisoned").insert(id, tx);
        Subscription { id, rx }
    }

    /// Deliver one event to every live subscriber.
    ///
    /// Callers serialize their publishes (the manager under its install
    /// lock, the engine on its single apply task), so the per-subscriber
    /// channel order is exactly the version order.
    pub fn publish(&self, event: &E) {
        let mut senders = self.senders.lock().expect("registry mutex poisoned");
        senders.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = id, "subscriber queue overflow, disconnecting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Drop all subscribers; their `next()` calls return `None`.
    pub fn clear(&self) {
        self.senders.lock().expect("registry mutex poisoned").clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().expect("registry mutex poisoned").len()
    }
}
