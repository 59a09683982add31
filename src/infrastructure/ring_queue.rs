//! Bounded lock-free MPMC ring queue
//!
//! Every cell carries a sequence counter. A producer claims slot `pos` by
//! advancing `tail` with a CAS once the cell's sequence equals `pos`, writes
//! the payload, then publishes it by storing `pos + 1`. Consumers mirror this
//! on `head` and hand the cell back to producers one lap later with
//! `pos + capacity`. No locks, no allocation after construction.

use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Cell<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer/multi-consumer queue
///
/// `push` fails instead of blocking when full, `pull` returns `None` when
/// empty. Capacity is always a power of two.
///
/// # Example
/// ```
/// use rt_gateway::infrastructure::ring_queue::RingQueue;
///
/// let q = RingQueue::with_capacity(4);
/// q.push(1).unwrap();
/// q.push(2).unwrap();
/// assert_eq!(q.pull(), Some(1));
/// assert_eq!(q.pull(), Some(2));
/// assert_eq!(q.pull(), None);
/// ```
pub struct RingQueue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    /// Producer area
    tail: CachePadded<AtomicUsize>,
    /// Consumer area
    head: CachePadded<AtomicUsize>,
}

// SAFETY: a cell's payload is only touched by the single producer or consumer
// that won the CAS for its position; the sequence counter orders the hand-off.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Create a queue holding at least `capacity` elements.
    ///
    /// Non power-of-two capacities are rounded up. At least two cells are
    /// allocated: with a single cell the free and filled sequences of a slot
    /// coincide.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();

        let buffer = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffer,
            mask: capacity - 1,
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue one element
    ///
    /// Returns the element back if the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut pos = self.tail.load(Ordering::Relaxed);

        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS grants exclusive access to this cell until
                        // the sequence store below publishes it.
                        unsafe { (*cell.data.get()).write(value) };
                        cell.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                // Cell still holds last lap's element
                return Err(value);
            } else {
                pos = self.tail.load(Ordering::Relaxed);
                backoff.snooze();
            }
        }
    }

    /// Dequeue one element, `None` if empty
    pub fn pull(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut pos = self.head.load(Ordering::Relaxed);

        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the producer published this cell (sequence == pos + 1) and
                        // winning the CAS makes us its only consumer.
                        let value = unsafe { (*cell.data.get()).assume_init_read() };
                        cell.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
                backoff.snooze();
            }
        }
    }

    /// Enqueue elements from the front of `items` until the queue is full
    ///
    /// Pushed elements are removed from `items`; whatever did not fit stays
    /// behind, in order. Returns the number pushed.
    pub fn push_many(&self, items: &mut Vec<T>) -> usize {
        let mut pushed = 0;
        let mut rejected = Vec::new();

        for item in items.drain(..) {
            if !rejected.is_empty() {
                rejected.push(item);
                continue;
            }

            match self.push(item) {
                Ok(()) => pushed += 1,
                Err(item) => rejected.push(item),
            }
        }

        *items = rejected;
        pushed
    }

    /// Dequeue up to `max` elements, appending them to `out`
    pub fn pull_many(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut pulled = 0;

        while pulled < max {
            match self.pull() {
                Some(value) => {
                    out.push(value);
                    pulled += 1;
                }
                None => break,
            }
        }

        pulled
    }

    /// Approximate number of queued elements
    ///
    /// Advisory only: stale as soon as another thread touches the queue.
    #[inline]
    pub fn available(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        while self.pull().is_some() {}
    }
}

impl<T> fmt::Debug for RingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}
