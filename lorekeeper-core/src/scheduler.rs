//! Keyed debounce timers.
//!
//! Scheduling a key that already has a pending timer aborts that timer and
//! starts a new one, so a burst of triggers produces a single firing after
//! the last one. A fired timer posts an event tagged with a ticket; the
//! receiver must [`claim`](Debouncer::claim) it before acting, which rejects
//! firings that raced with a later reschedule.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

struct Timer {
    ticket: u64,
    handle: JoinHandle<()>,
}

/// Per-key cancel-and-reschedule timers that report over a channel.
///
/// Timers are spawned on the current tokio runtime.
pub struct Debouncer<K, E> {
    timers: HashMap<K, Timer>,
    next_ticket: u64,
    delay: Duration,
    tx: UnboundedSender<E>,
    wrap: fn(K, u64) -> E,
}

impl<K, E> Debouncer<K, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    E: Send + 'static,
{
    /// Create a debouncer that sends `wrap(key, ticket)` on `tx` when a timer fires.
    pub fn new(tx: UnboundedSender<E>, delay: Duration, wrap: fn(K, u64) -> E) -> Self {
        Self {
            timers: HashMap::new(),
            next_ticket: 0,
            delay,
            tx,
            wrap,
        }
    }

    /// Schedule `key` after the default delay, replacing any pending timer.
    pub fn schedule(&mut self, key: K) {
        self.schedule_after(key, self.delay);
    }

    /// Schedule `key` after `delay`, replacing any pending timer.
    pub fn schedule_after(&mut self, key: K, delay: Duration) {
        self.cancel(&key);

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let deadline = Instant::now() + delay;
        let event = (self.wrap)(key.clone(), ticket);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;
            // Receiver may have been dropped with the session.
            let _ = tx.send(event);
        });

        self.timers.insert(key, Timer { ticket, handle });
    }

    /// Accept a firing. Returns false if the timer was cancelled or
    /// rescheduled after this ticket was issued.
    pub fn claim(&mut self, key: &K, ticket: u64) -> bool {
        match self.timers.get(key) {
            Some(timer) if timer.ticket == ticket => {
                self.timers.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Cancel a pending timer. Returns whether one existed.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        count
    }

    /// Whether `key` has a timer that has not been claimed or cancelled.
    pub fn is_pending(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }
}

impl<K, E> Drop for Debouncer<K, E> {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq, Eq)]
    struct Fired(&'static str, u64);

    fn fired(key: &'static str, ticket: u64) -> Fired {
        Fired(key, ticket)
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_and_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(tx, Duration::from_millis(10), fired);

        debouncer.schedule("a");
        assert!(debouncer.is_pending(&"a"));

        let Fired(key, ticket) = rx.recv().await.unwrap();
        assert_eq!(key, "a");
        assert!(debouncer.claim(&key, ticket));
        assert!(!debouncer.is_pending(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_collapses() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(tx, Duration::from_millis(100), fired);

        for _ in 0..10 {
            debouncer.schedule("a");
            tokio::time::advance(Duration::from_millis(50)).await;
        }

        let Fired(_, ticket) = rx.recv().await.unwrap();
        assert_eq!(ticket, 9);
        assert!(debouncer.claim(&"a", ticket));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_keys() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(tx, Duration::from_millis(100), fired);

        debouncer.schedule("a");
        debouncer.schedule_after("b", Duration::from_millis(50));

        assert_eq!(rx.recv().await.unwrap().0, "b");
        assert_eq!(rx.recv().await.unwrap().0, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ticket_rejected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(tx, Duration::from_millis(10), fired);

        debouncer.schedule("a");
        let Fired(_, old) = rx.recv().await.unwrap();

        // Rescheduled after firing but before the firing was handled
        debouncer.schedule("a");
        assert!(!debouncer.claim(&"a", old));
        assert!(debouncer.is_pending(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(tx, Duration::from_millis(10), fired);

        debouncer.schedule("a");
        debouncer.schedule("b");
        assert_eq!(debouncer.cancel_all(), 2);
        assert_eq!(debouncer.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
