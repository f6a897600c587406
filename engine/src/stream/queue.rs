//! Bounded drop-oldest intake queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Duration;

/// One normalized market tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub qty: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, price: f64, qty: f64, timestamp: DateTime<Utc>) -> Self {
        Self { symbol: symbol.into(), price, qty, timestamp }
    }
}

/// Fixed-capacity tick queue. When full, the oldest buffered tick is
/// discarded and the new one admitted, so consumers always see the freshest
/// data the producer managed to deliver.
pub struct TickQueue {
    inner: Mutex<VecDeque<Tick>>,
    capacity: usize,
    notify: Notify,
}

impl TickQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Enqueue a tick, evicting the oldest entry when at capacity.
    /// Returns the evicted tick, if any.
    pub fn push(&self, tick: Tick) -> Option<Tick> {
        let evicted = {
            let mut queue = self.inner.lock().unwrap();
            let evicted = if queue.len() == self.capacity { queue.pop_front() } else { None };
            queue.push_back(tick);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<Tick> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for the next tick.
    pub async fn recv(&self) -> Tick {
        loop {
            // register interest before checking, so a push between the check
            // and the await cannot be missed
            let notified = self.notify.notified();
            if let Some(tick) = self.try_pop() {
                return tick;
            }
            notified.await;
        }
    }

    /// Wait for the next tick with a deadline. `None` on timeout — the bot
    /// loops treat that as idle, not as an error.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Tick> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64) -> Tick {
        Tick::new("BTC/USDT", price, 1.0, Utc::now())
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let queue = TickQueue::new(3);
        for price in [1.0, 2.0, 3.0] {
            assert!(queue.push(tick(price)).is_none());
        }
        let evicted = queue.push(tick(4.0)).expect("oldest evicted");
        assert_eq!(evicted.price, 1.0);
        assert_eq!(queue.len(), 3);

        let remaining: Vec<f64> = std::iter::from_fn(|| queue.try_pop()).map(|t| t.price).collect();
        assert_eq!(remaining, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let queue = TickQueue::new(5);
        for price in 0..100 {
            queue.push(tick(price as f64));
            assert!(queue.len() <= queue.capacity());
        }
    }

    #[tokio::test]
    async fn test_recv_timeout_on_empty() {
        let queue = TickQueue::new(2);
        assert!(queue.recv_timeout(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let queue = std::sync::Arc::new(TickQueue::new(2));
        let consumer = queue.clone();
        let task = tokio::spawn(async move { consumer.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(tick(7.0));
        let received = task.await.unwrap();
        assert_eq!(received.price, 7.0);
    }
}
