//! Bounded lock-free MPMC queue.
//!
//! The workhorse container of the crate: a fixed-capacity multi-producer
//! multi-consumer ring (Dmitry Vyukov's bounded MPMC design) used directly
//! for inter-thread hand-off and, with block offsets as items, as the free
//! list of every [`crate::pool::Pool`].
//!
//! Each slot carries its own sequence counter; producers and consumers
//! claim slots by CAS on the `tail`/`head` cursors and synchronize payload
//! visibility purely through the per-slot counter. Full and empty are
//! ordinary, immediate outcomes; nothing ever blocks or spins unbounded.
//!
//! [`SignalledQueue`] layers a condition variable on top for consumers
//! that want to sleep instead of poll.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

mod signalled;

pub use signalled::SignalledQueue;

// ============================================================================
// Queue
// ============================================================================

/// One ring slot: a sequence counter plus the (possibly uninitialized)
/// item it guards.
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity lock-free MPMC queue.
///
/// Capacity is always a power of two; other requests are rounded up with a
/// warning. The queue never reallocates and never blocks: `push` on a full
/// queue hands the item back, `pull` on an empty queue returns `None`.
///
/// # Examples
///
/// ```rust
/// use millrace::queue::Queue;
///
/// let q: Queue<u64> = Queue::new(4);
/// assert!(q.push(7).is_ok());
/// assert_eq!(q.pull(), Some(7));
/// assert_eq!(q.pull(), None);
/// ```
pub struct Queue<T> {
    mask: usize,
    slots: Box<[Slot<T>]>,
    tail: CachePadded<AtomicUsize>,
    head: CachePadded<AtomicUsize>,
}

// SAFETY: items are moved in and out whole; a slot is only touched by the
// single producer or consumer that won its claiming CAS, so sending the
// queue (or sharing it) across threads is safe whenever T itself is Send.
unsafe impl<T: Send> Send for Queue<T> {}
// SAFETY: see above; &Queue only permits claim-then-move access, never
// shared references to T.
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Create a queue with at least `capacity` slots.
    ///
    /// Non-power-of-two capacities are rounded up (logged as a warning,
    /// never an error). A capacity of 0 is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let rounded = capacity.next_power_of_two();
        if rounded != capacity {
            tracing::warn!(
                requested = capacity,
                actual = rounded,
                "queue capacity rounded up to a power of two"
            );
        }

        let slots = (0..rounded)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            mask: rounded - 1,
            slots,
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Estimate of the number of queued items.
    ///
    /// Only an estimate while other threads are pushing or pulling.
    #[inline]
    pub fn available(&self) -> usize {
        self.tail
            .load(Ordering::Relaxed)
            .wrapping_sub(self.head.load(Ordering::Relaxed))
    }

    /// Whether the queue currently looks empty (same caveat as
    /// [`Queue::available`]).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Append an item.
    ///
    /// Returns the item back when the queue is full. Never blocks; a lost
    /// CAS against another producer retries with the refreshed cursor.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = (seq as isize).wrapping_sub(pos as isize);

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS gives this producer
                        // exclusive claim on the slot until the sequence
                        // store below publishes it to consumers.
                        unsafe { (*slot.value.get()).write(item) };
                        slot.sequence
                            .store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        pos = current;
                        std::hint::spin_loop();
                    }
                }
            } else if diff < 0 {
                // A full lap behind: the slot still holds an unconsumed
                // item from the previous cycle.
                return Err(item);
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Remove the oldest item, or `None` when the queue is empty.
    pub fn pull(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = (seq as isize).wrapping_sub(pos.wrapping_add(1) as isize);

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS gives this consumer
                        // exclusive claim; the Acquire load of `seq` pairs
                        // with the producer's Release store, so the value
                        // is fully written.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        pos = current;
                        std::hint::spin_loop();
                    }
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Push a batch element-wise, stopping at the first rejection.
    ///
    /// Returns how many items were accepted.
    pub fn push_many(&self, items: &[T]) -> usize
    where
        T: Copy,
    {
        for (i, &item) in items.iter().enumerate() {
            if self.push(item).is_err() {
                return i;
            }
        }
        items.len()
    }

    /// Pull up to `n` items into `out`, stopping as soon as the queue runs
    /// dry. Returns how many items were appended.
    pub fn pull_many(&self, out: &mut Vec<T>, n: usize) -> usize {
        for i in 0..n {
            match self.pull() {
                Some(item) => out.push(item),
                None => return i,
            }
        }
        n
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Exclusive access at this point; release anything still queued.
        while self.pull().is_some() {}
    }
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_push_pull_fifo() {
        let q: Queue<u32> = Queue::new(8);
        for i in 0..5 {
            q.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.pull(), Some(i));
        }
        assert_eq!(q.pull(), None);
    }

    #[test]
    fn test_full_returns_item() {
        let q: Queue<u32> = Queue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.push(3), Err(3));
        assert_eq!(q.available(), 2);
    }

    #[test]
    fn test_capacity_rounded_up() {
        let q: Queue<u32> = Queue::new(5);
        assert_eq!(q.capacity(), 8);
        let q: Queue<u32> = Queue::new(16);
        assert_eq!(q.capacity(), 16);
    }

    #[test]
    fn test_capacity_one_cycles() {
        let q: Queue<u32> = Queue::new(1);
        for i in 0..100 {
            q.push(i).unwrap();
            assert_eq!(q.push(i), Err(i));
            assert_eq!(q.pull(), Some(i));
            assert_eq!(q.pull(), None);
        }
    }

    #[test]
    fn test_push_many_short_circuits() {
        let q: Queue<u32> = Queue::new(4);
        assert_eq!(q.push_many(&[1, 2, 3, 4, 5, 6]), 4);
        let mut out = Vec::new();
        assert_eq!(q.pull_many(&mut out, 10), 4);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_drop_releases_items() {
        struct Token(Arc<AtomicUsize>);
        impl Drop for Token {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let q: Queue<Token> = Queue::new(8);
        for _ in 0..6 {
            assert!(q.push(Token(drops.clone())).is_ok());
        }
        drop(q.pull());
        assert_eq!(drops.load(Ordering::Relaxed), 1);
        drop(q);
        assert_eq!(drops.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_two_threads_interleave() {
        let q = Arc::new(Queue::<usize>::new(64));
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    loop {
                        if q.push(i).is_ok() {
                            break;
                        }
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut seen = Vec::with_capacity(1000);
        while seen.len() < 1000 {
            if let Some(v) = q.pull() {
                seen.push(v);
            }
        }
        producer.join().unwrap();

        // Single producer, single consumer: order fully preserved.
        assert!(seen.iter().enumerate().all(|(i, &v)| i == v));
    }
}
