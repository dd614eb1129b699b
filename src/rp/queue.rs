//! Bounded request queue
//!
//! A bounded multi-consumer queue feeding the worker pool. Enqueue is
//! non-blocking and fails when full. An idle worker first spins (bounded,
//! adaptively grown when wake-ups come too fast) and then sleeps on a
//! condvar; the spin bound doubles from 1 000 up to 1 000 000 iterations
//! whenever the gap between going to sleep and being woken stays under
//! 500 µs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::core::error::{Error, Result};

use super::messages::Message;

const SPIN_START: usize = 1_000;
const SPIN_MAX: usize = 1_000_000;
const WAKE_GAP: Duration = Duration::from_micros(500);

struct QueueInner {
    items: VecDeque<Message>,
    closed: bool,
}

/// The bounded queue.
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
    capacity: usize,
    spin_limit: AtomicUsize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            cond: Condvar::new(),
            capacity,
            spin_limit: AtomicUsize::new(SPIN_START),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Enqueue a message; fails when the queue is full or closed.
    pub fn enqueue(&self, message: Message) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::new(
                crate::core::error::ErrorKind::Disconnect,
                "request queue is closed",
            ));
        }
        if inner.items.len() >= self.capacity {
            return Err(Error::operation_failed("request queue is full"));
        }
        inner.items.push_back(message);
        drop(inner);
        self.cond.notify_one();
        Ok(())
    }

    /// Dequeue the next message, spinning briefly before sleeping.
    /// Returns `None` once the queue is closed and drained.
    pub fn dequeue(&self) -> Option<Message> {
        // bounded spin before taking the slow path
        let limit = self.spin_limit.load(Ordering::Relaxed);
        for _ in 0..limit {
            if let Ok(mut inner) = self.inner.try_lock() {
                if let Some(message) = inner.items.pop_front() {
                    return Some(message);
                }
                if inner.closed {
                    return None;
                }
            }
            std::hint::spin_loop();
        }

        let slept_at = Instant::now();
        let mut inner = self.lock();
        loop {
            if let Some(message) = inner.items.pop_front() {
                drop(inner);
                // a wake-up arriving almost immediately means the spin
                // bound is too small for the current load
                if slept_at.elapsed() < WAKE_GAP {
                    let current = self.spin_limit.load(Ordering::Relaxed);
                    if current < SPIN_MAX {
                        self.spin_limit
                            .store((current * 2).min(SPIN_MAX), Ordering::Relaxed);
                    }
                }
                return Some(message);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .cond
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Close the queue; sleeping workers are woken to drain and exit.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        drop(inner);
        self.cond.notify_all();
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current adaptive spin bound, for tests.
    pub fn spin_limit(&self) -> usize {
        self.spin_limit.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rp::messages::InternalBody;

    fn internal() -> Message {
        Message::Internal(InternalBody::CommitRelease { commit_id: 1 })
    }

    #[test]
    fn test_enqueue_dequeue() {
        let queue = RequestQueue::new(4);
        queue.enqueue(internal()).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.dequeue().is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bounded_capacity() {
        let queue = RequestQueue::new(2);
        queue.enqueue(internal()).unwrap();
        queue.enqueue(internal()).unwrap();
        let err = queue.enqueue(internal()).unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::OperationFailed);
    }

    #[test]
    fn test_close_wakes_consumer() {
        let queue = std::sync::Arc::new(RequestQueue::new(4));
        let q = std::sync::Arc::clone(&queue);
        let handle = std::thread::spawn(move || q.dequeue());
        std::thread::sleep(Duration::from_millis(50));
        queue.close();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_closed_queue_rejects_enqueue() {
        let queue = RequestQueue::new(4);
        queue.close();
        assert!(queue.enqueue(internal()).is_err());
    }

    #[test]
    fn test_drain_after_close() {
        let queue = RequestQueue::new(4);
        queue.enqueue(internal()).unwrap();
        queue.close();
        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_spin_limit_starts_at_base() {
        let queue = RequestQueue::new(4);
        assert_eq!(queue.spin_limit(), SPIN_START);
    }
}
