//! Multi-subscriber fan-out of change events.
//!
//! Each broadcaster owns a registry of bounded per-subscriber channels.
//! Publishing never blocks: an event is delivered to every subscriber with
//! buffer room, and a subscriber whose buffer is full has the new event
//! dropped, is marked lagging and is unsubscribed on the spot. What a
//! subscriber receives is therefore always a prefix of the publish
//! sequence, in publish order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug)]
struct Entry<T> {
    tx: mpsc::Sender<T>,
    lagging: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct Broadcaster<T> {
    name: &'static str,
    buffer: usize,
    subscribers: Mutex<HashMap<u64, Entry<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new(name: &'static str, buffer: usize) -> Self {
        Self {
            name,
            buffer: buffer.max(1),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Attach a new subscriber with an empty buffer. It sees events
    /// published from now on.
    pub fn join(&self) -> Subscriber<T> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let lagging = Arc::new(AtomicBool::new(false));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(
            id,
            Entry {
                tx,
                lagging: lagging.clone(),
            },
        );
        Subscriber { rx, lagging }
    }

    /// Deliver an event to every current subscriber. Never blocks; a full
    /// subscriber is marked lagging and dropped, a closed one is cleaned
    /// up.
    pub fn publish(&self, event: &T) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|id, entry| match entry.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                entry.lagging.store(true, Ordering::Relaxed);
                tracing::warn!(
                    caster = self.name,
                    subscriber = *id,
                    "subscriber buffer full, dropping subscription"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// A bounded-buffer consumer attached to a broadcaster for the lifetime of
/// a session. Dropping it unsubscribes and discards anything buffered.
#[derive(Debug)]
pub struct Subscriber<T> {
    rx: mpsc::Receiver<T>,
    lagging: Arc<AtomicBool>,
}

impl<T> Subscriber<T> {
    /// Next buffered event. `None` once the subscription ended: the
    /// broadcaster dropped this subscriber for lagging and the buffer has
    /// drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Was this subscriber dropped for falling behind?
    pub fn lagged(&self) -> bool {
        self.lagging.load(Ordering::Relaxed)
    }

    pub fn close(self) {}
}
