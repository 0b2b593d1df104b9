//! Thread-safe FIFO of pending audio batches.
//!
//! This is the only structure both threads mutate:
//! - decoder callback thread → [`BatchQueue::push`] (never waits)
//! - delivery thread → [`BatchQueue::pop_timeout`] (bounded wait)
//! - control callers → [`BatchQueue::drain`] (never waits)

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::format::AudioFormat;

/// One unit of decoded audio handed from the producer to the delivery thread.
///
/// The frame buffer is owned; nothing aliases it once it has been queued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioBatch<S> {
    pub session: S,
    pub format: AudioFormat,
    pub frames: Vec<u8>,
    pub num_frames: usize,
}

/// Policy applied when a bounded queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room.
    DropOldest,
    /// Reject the incoming item; the producer may deliver it again later.
    #[default]
    DropNewest,
}

/// Result of a [`BatchQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    Queued,
    /// Queued after evicting this (oldest) item.
    DroppedOldest(T),
    /// Not queued; the item is handed back.
    Rejected(T),
}

/// FIFO queue guarded by a mutex, with a condvar signalling "item pushed or wake requested".
///
/// ## Design
/// - Optional capacity; overflow never blocks the producer, it follows [`OverflowPolicy`].
/// - `pop_timeout` is the only waiting operation, and it is always bounded.
pub struct BatchQueue<T> {
    inner: Mutex<VecDeque<T>>,
    cv: Condvar,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
}

impl<T> BatchQueue<T> {
    /// Create a queue; `capacity` of `None` means unbounded. A capacity of zero is treated as one.
    pub fn new(capacity: Option<usize>, overflow: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            capacity: capacity.map(|c| c.max(1)),
            overflow,
        }
    }

    /// Current queued items (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an item at the back without waiting.
    pub fn push(&self, item: T) -> PushOutcome<T> {
        let mut g = self.inner.lock().unwrap();
        let outcome = match self.capacity {
            Some(cap) if g.len() >= cap => match self.overflow {
                OverflowPolicy::DropNewest => return PushOutcome::Rejected(item),
                OverflowPolicy::DropOldest => {
                    let evicted = g.pop_front();
                    g.push_back(item);
                    match evicted {
                        Some(old) => PushOutcome::DroppedOldest(old),
                        None => PushOutcome::Queued,
                    }
                }
            },
            _ => {
                g.push_back(item);
                PushOutcome::Queued
            }
        };
        drop(g);
        self.cv.notify_one();
        outcome
    }

    /// Put an item back at the head, ahead of everything queued.
    ///
    /// Used to hand back an item the consumer popped but must not act on yet. Ignores capacity.
    pub fn push_front(&self, item: T) {
        let mut g = self.inner.lock().unwrap();
        g.push_front(item);
        drop(g);
        self.cv.notify_one();
    }

    /// Pop the head item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when woken by [`BatchQueue::wake_all`] with nothing queued.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock().unwrap();
        if let Some(item) = g.pop_front() {
            return Some(item);
        }
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (ng, res) = self.cv.wait_timeout(g, deadline - now).unwrap();
            g = ng;
            if let Some(item) = g.pop_front() {
                return Some(item);
            }
            if !res.timed_out() {
                // Explicit wake with nothing to hand out; let the caller re-check its flags.
                return None;
            }
        }
    }

    /// Pop the head item if there is one, without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Discard everything currently queued and return how many items were dropped.
    ///
    /// Repeats non-blocking pops until the queue is empty, so it never waits for new items.
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.try_pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Wake every waiter in [`BatchQueue::pop_timeout`] so it can observe a changed flag.
    pub fn wake_all(&self) {
        let _g = self.inner.lock().unwrap();
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn pop_timeout_empty_returns_none() {
        let q: BatchQueue<u32> = BatchQueue::new(None, OverflowPolicy::default());
        let start = Instant::now();
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = BatchQueue::new(None, OverflowPolicy::default());
        for i in 0..5 {
            assert_eq!(q.push(i), PushOutcome::Queued);
        }
        let out: Vec<_> = std::iter::from_fn(|| q.try_pop()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn pop_timeout_receives_item_from_other_thread() {
        let q = Arc::new(BatchQueue::new(None, OverflowPolicy::default()));
        let q_push = q.clone();
        let barrier = Arc::new(Barrier::new(2));
        let start = barrier.clone();

        let handle = thread::spawn(move || {
            start.wait();
            q_push.push(7u32);
        });

        barrier.wait();
        let got = q.pop_timeout(Duration::from_secs(2));
        assert_eq!(got, Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn drop_newest_rejects_when_full() {
        let q = BatchQueue::new(Some(2), OverflowPolicy::DropNewest);
        assert_eq!(q.push(1), PushOutcome::Queued);
        assert_eq!(q.push(2), PushOutcome::Queued);
        assert_eq!(q.push(3), PushOutcome::Rejected(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(1));
    }

    #[test]
    fn drop_oldest_evicts_head_when_full() {
        let q = BatchQueue::new(Some(2), OverflowPolicy::DropOldest);
        q.push(1);
        q.push(2);
        assert_eq!(q.push(3), PushOutcome::DroppedOldest(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let q = BatchQueue::new(Some(0), OverflowPolicy::DropNewest);
        assert_eq!(q.push(1), PushOutcome::Queued);
        assert_eq!(q.push(2), PushOutcome::Rejected(2));
    }

    #[test]
    fn push_front_jumps_the_line() {
        let q = BatchQueue::new(None, OverflowPolicy::default());
        q.push(2);
        q.push(3);
        q.push_front(1);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
    }

    #[test]
    fn drain_empties_without_waiting() {
        let q = BatchQueue::new(None, OverflowPolicy::default());
        for i in 0..10 {
            q.push(i);
        }
        assert_eq!(q.drain(), 10);
        assert!(q.is_empty());
        assert_eq!(q.drain(), 0);
    }

    #[test]
    fn wake_all_releases_waiter_early() {
        let q: Arc<BatchQueue<u32>> = Arc::new(BatchQueue::new(None, OverflowPolicy::default()));
        let q_wait = q.clone();
        let start = Instant::now();

        let handle = thread::spawn(move || q_wait.pop_timeout(Duration::from_secs(5)));

        while !handle.is_finished() && start.elapsed() < Duration::from_secs(4) {
            q.wake_all();
            thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.join().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
