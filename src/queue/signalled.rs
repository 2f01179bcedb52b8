//! Blocking facade over the lock-free queue.

use super::Queue;
use crate::error::{Error, Result};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A [`Queue`] paired with a condition variable so consumers can sleep
/// until data arrives instead of polling.
///
/// Producers stay cheap: items travel through the lock-free ring and the
/// mutex only guards the closed flag and the wakeup. Closing the queue
/// wakes every blocked consumer; remaining items can still be drained,
/// after which pulls report [`Error::Stopped`] as a clean end-of-stream.
///
/// # Example
///
/// ```rust
/// use millrace::queue::SignalledQueue;
/// use std::time::Duration;
///
/// let q: SignalledQueue<u32> = SignalledQueue::new(8);
/// q.push(42).unwrap();
/// assert_eq!(q.pull_timeout(Duration::from_millis(10)).unwrap(), Some(42));
/// q.close();
/// assert!(q.pull_timeout(Duration::from_millis(10)).is_err());
/// ```
pub struct SignalledQueue<T> {
    queue: Queue<T>,
    closed: Mutex<bool>,
    avail: Condvar,
}

impl<T: Send> SignalledQueue<T> {
    /// Create a signalled queue with at least `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Queue::new(capacity),
            closed: Mutex::new(false),
            avail: Condvar::new(),
        }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Estimate of the number of queued items.
    #[inline]
    pub fn available(&self) -> usize {
        self.queue.available()
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Append an item and wake blocked consumers.
    ///
    /// Returns the item back when the queue is full or already closed.
    pub fn push(&self, item: T) -> std::result::Result<(), T> {
        let closed = self.closed.lock().unwrap();
        if *closed {
            return Err(item);
        }
        self.queue.push(item)?;
        self.avail.notify_all();
        drop(closed);
        Ok(())
    }

    /// Push a batch, stopping at the first rejection; returns the number
    /// accepted. A closed queue accepts nothing.
    pub fn push_many(&self, items: &[T]) -> usize
    where
        T: Copy,
    {
        let closed = self.closed.lock().unwrap();
        if *closed {
            return 0;
        }
        let pushed = self.queue.push_many(items);
        if pushed > 0 {
            self.avail.notify_all();
        }
        drop(closed);
        pushed
    }

    /// Wait up to `timeout` for an item.
    ///
    /// Returns `Ok(Some(item))` on success and `Ok(None)` on timeout.
    /// Once the queue is closed and drained every call returns
    /// [`Error::Stopped`].
    pub fn pull_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        // Fast path: no need for the lock while items are flowing.
        if let Some(item) = self.queue.pull() {
            return Ok(Some(item));
        }

        let deadline = Instant::now() + timeout;
        let mut closed = self.closed.lock().unwrap();
        loop {
            // Re-check with the lock held: a producer broadcasts under the
            // same lock, so an item pushed after this check cannot have
            // signalled before we wait.
            if let Some(item) = self.queue.pull() {
                return Ok(Some(item));
            }
            if *closed {
                return Err(Error::Stopped);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, wait) = self.avail.wait_timeout(closed, deadline - now).unwrap();
            closed = guard;
            if wait.timed_out() {
                // One last look; the wakeup may have raced the timeout.
                return Ok(self.queue.pull());
            }
        }
    }

    /// Wait up to `timeout` for the first item, then drain up to `n`
    /// without blocking further. Returns how many items were appended to
    /// `out`; 0 means the wait timed out.
    pub fn pull_many_timeout(&self, out: &mut Vec<T>, n: usize, timeout: Duration) -> Result<usize> {
        if n == 0 {
            return Ok(0);
        }
        match self.pull_timeout(timeout)? {
            Some(item) => {
                out.push(item);
                Ok(1 + self.queue.pull_many(out, n - 1))
            }
            None => Ok(0),
        }
    }

    /// Close the queue and wake every blocked consumer.
    ///
    /// Queued items stay pullable; further pushes are rejected. Closing
    /// twice is harmless.
    pub fn close(&self) {
        let mut closed = self.closed.lock().unwrap();
        *closed = true;
        self.avail.notify_all();
    }

    /// Accept pushes again after a [`close`](Self::close).
    ///
    /// Restartable owners call this on their next open; consumers from the
    /// previous run must have exited by then.
    pub fn reopen(&self) {
        let mut closed = self.closed.lock().unwrap();
        *closed = false;
    }
}

impl<T> std::fmt::Debug for SignalledQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalledQueue")
            .field("capacity", &self.queue.capacity())
            .field("available", &self.queue.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_wakes_blocked_consumer() {
        let q = Arc::new(SignalledQueue::<u32>::new(4));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pull_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(50));
        q.push(99).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), Some(99));
    }

    #[test]
    fn test_close_unblocks_consumer() {
        let q = Arc::new(SignalledQueue::<u32>::new(4));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pull_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(50));
        q.close();
        assert!(matches!(consumer.join().unwrap(), Err(Error::Stopped)));
    }

    #[test]
    fn test_drain_after_close() {
        let q: SignalledQueue<u32> = SignalledQueue::new(8);
        for i in 0..3 {
            q.push(i).unwrap();
        }
        q.close();

        for i in 0..3 {
            assert_eq!(q.pull_timeout(Duration::from_millis(10)).unwrap(), Some(i));
        }
        assert!(matches!(
            q.pull_timeout(Duration::from_millis(10)),
            Err(Error::Stopped)
        ));
    }

    #[test]
    fn test_push_after_close_rejected() {
        let q: SignalledQueue<u32> = SignalledQueue::new(8);
        q.close();
        assert_eq!(q.push(1), Err(1));
        assert_eq!(q.push_many(&[1, 2, 3]), 0);
    }

    #[test]
    fn test_reopen_accepts_again() {
        let q: SignalledQueue<u32> = SignalledQueue::new(8);
        q.close();
        assert_eq!(q.push(1), Err(1));

        q.reopen();
        assert!(!q.is_closed());
        assert_eq!(q.push(2), Ok(()));
        assert_eq!(q.pull_timeout(Duration::from_millis(10)).unwrap(), Some(2));
    }

    #[test]
    fn test_timeout_expires_empty() {
        let q: SignalledQueue<u32> = SignalledQueue::new(8);
        let start = Instant::now();
        assert_eq!(q.pull_timeout(Duration::from_millis(20)).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_pull_many_drains_batch() {
        let q: SignalledQueue<u32> = SignalledQueue::new(16);
        for i in 0..5 {
            q.push(i).unwrap();
        }
        let mut out = Vec::new();
        let n = q
            .pull_many_timeout(&mut out, 3, Duration::from_millis(10))
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, vec![0, 1, 2]);
    }
}
