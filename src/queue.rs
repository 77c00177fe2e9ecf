//! Bounded, lossy cross-task queues.
//!
//! Two policies cover every queue in the system:
//!
//! - [`event_queue`] — a bounded channel that drops the *incoming* item when
//!   full. Used for chat events: the producer never blocks, the consumer
//!   drains lazily.
//! - [`LatestSlot`] — a single slot where a new value overwrites any
//!   unconsumed previous one. Used for detection jobs and results: only the
//!   freshest value matters, producers never block, the slot never grows.
//!
//! Both favor liveness over completeness by design.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Notify;

/// Sending half of a drop-newest-on-full event queue.
#[derive(Clone)]
pub struct EventSender<T> {
    tx: mpsc::Sender<T>,
}

/// Receiving half of an event queue.
pub struct EventReceiver<T> {
    rx: mpsc::Receiver<T>,
}

/// Create a bounded event queue with the given capacity.
pub fn event_queue<T>(capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, EventReceiver { rx })
}

impl<T> EventSender<T> {
    /// Try to enqueue without blocking.
    ///
    /// Returns `true` if the item was queued, `false` if it was dropped
    /// because the queue is full or the receiver is gone. The caller logs
    /// the drop with whatever context it has; dropping is a defined
    /// behavior here, not an error.
    pub fn try_push(&self, item: T) -> bool {
        self.tx.try_send(item).is_ok()
    }
}

impl<T> EventReceiver<T> {
    /// Drain everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            items.push(item);
        }
        items
    }

    /// Pop one item if immediately available.
    pub fn try_pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// A single-value slot with overwrite-on-full semantics.
///
/// `put` replaces any unconsumed value; `take` consumes it. Cheaply
/// cloneable, safe to share between one producer and one consumer.
#[derive(Clone)]
pub struct LatestSlot<T> {
    value: Arc<Mutex<Option<T>>>,
    notify: Arc<Notify>,
}

impl<T> LatestSlot<T> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Store a value, replacing any unconsumed previous one.
    ///
    /// Returns `true` if an unconsumed value was overwritten.
    pub fn put(&self, item: T) -> bool {
        let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        let overwritten = guard.replace(item).is_some();
        drop(guard);
        self.notify.notify_one();
        overwritten
    }

    /// Take the current value if one is pending, without waiting.
    pub fn take(&self) -> Option<T> {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Wait up to `timeout` for a value to become available.
    ///
    /// Returns `None` if the timeout elapses with the slot still empty.
    pub async fn take_timeout(&self, timeout: Duration) -> Option<T> {
        if let Some(item) = self.take() {
            return Some(item);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.take() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.take();
            }
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_queue_drops_when_full() {
        let (tx, mut rx) = event_queue::<u32>(2);
        assert!(tx.try_push(1));
        assert!(tx.try_push(2));
        // Queue full: third push is dropped, first two survive.
        assert!(!tx.try_push(3));

        assert_eq!(rx.drain(), vec![1, 2]);
        // Space freed: pushes succeed again.
        assert!(tx.try_push(4));
        assert_eq!(rx.try_pop(), Some(4));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_event_queue_drain_preserves_order() {
        let (tx, mut rx) = event_queue::<&str>(8);
        for item in ["a", "b", "c"] {
            assert!(tx.try_push(item));
        }
        assert_eq!(rx.drain(), vec!["a", "b", "c"]);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_event_queue_push_after_receiver_dropped() {
        let (tx, rx) = event_queue::<u32>(2);
        drop(rx);
        assert!(!tx.try_push(1));
    }

    #[test]
    fn test_latest_slot_overwrites() {
        let slot = LatestSlot::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        // Only the most recent value is ever visible.
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_latest_slot_shared_between_clones() {
        let producer = LatestSlot::new();
        let consumer = producer.clone();
        producer.put("job");
        assert_eq!(consumer.take(), Some("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_timeout_returns_pending_value() {
        let slot = LatestSlot::new();
        slot.put(7);
        assert_eq!(slot.take_timeout(Duration::from_secs(1)).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_timeout_times_out_empty() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        assert_eq!(slot.take_timeout(Duration::from_secs(1)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_timeout_wakes_on_put() {
        let slot = LatestSlot::new();
        let consumer = slot.clone();
        let waiter =
            tokio::spawn(async move { consumer.take_timeout(Duration::from_secs(10)).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        slot.put(99);
        assert_eq!(waiter.await.unwrap(), Some(99));
    }
}
