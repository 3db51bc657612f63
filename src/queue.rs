//! Thread-safe FIFO with a "became non-empty" signal.
//!
//! Backs both the command queue (application threads → controller) and the
//! callback queue (controller → dispatch thread). Waiters re-check their
//! cancellation predicate on every wakeup, so a stop flag set alongside a
//! [`NotifyQueue::notify_all`] always terminates the wait.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A mutex-guarded FIFO paired with a condition variable.
pub struct NotifyQueue<T> {
    items: Mutex<VecDeque<T>>,
    nonempty: Condvar,
}

impl<T> NotifyQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        NotifyQueue {
            items: Mutex::new(VecDeque::new()),
            nonempty: Condvar::new(),
        }
    }

    /// Appends `item` and wakes every waiter.
    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
        self.nonempty.notify_all();
    }

    /// Removes the head of the queue if one is present.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().unwrap().pop_front()
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    /// Blocks until the queue is non-empty or `keep_waiting` returns
    /// false. The predicate is evaluated with the queue lock held, so a
    /// flag set before [`notify_all`](Self::notify_all) is never missed.
    pub fn wait_nonempty(&self, keep_waiting: impl Fn() -> bool) {
        let mut items = self.items.lock().unwrap();
        while items.is_empty() && keep_waiting() {
            items = self.nonempty.wait(items).unwrap();
        }
    }

    /// Wakes every waiter without enqueuing anything; used to deliver a
    /// stop-flag change. Takes the lock so a concurrent waiter cannot
    /// park between its predicate check and the notification.
    pub fn notify_all(&self) {
        let _items = self.items.lock().unwrap();
        self.nonempty.notify_all();
    }
}

impl<T> Default for NotifyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn preserves_fifo_order() {
        let queue = NotifyQueue::new();
        for i in 0..100 {
            queue.push(i);
        }
        for i in 0..100 {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn wait_wakes_on_push() {
        let queue = Arc::new(NotifyQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.wait_nonempty(|| true);
                queue.try_pop()
            })
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(7u32);
        assert_eq!(waiter.join().unwrap(), Some(7));
    }

    #[test]
    fn wait_wakes_on_cancellation() {
        let queue: Arc<NotifyQueue<u32>> = Arc::new(NotifyQueue::new());
        let stop = Arc::new(AtomicBool::new(false));
        let waiter = {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                queue.wait_nonempty(|| !stop.load(Ordering::Acquire));
            })
        };
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Release);
        queue.notify_all();
        waiter.join().unwrap();
        assert!(queue.is_empty());
    }
}
