//! Reference-counted record pool for the zero-copy hot path
//!
//! A fixed arena of equally sized [`Record`] slots. The free list is a
//! [`RingQueue`] of slot indices, so allocation and release are lock-free.
//! Callers hold [`Smp`] handles: cloning a handle takes a reference, dropping
//! it releases one, and the slot goes back to the free list when the last
//! reference is gone.

use crate::core::record::Record;
use crate::infrastructure::ring_queue::RingQueue;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;

struct Slot {
    refcnt: AtomicUsize,
    record: UnsafeCell<Record>,
}

struct PoolInner {
    slots: Box<[Slot]>,
    free: RingQueue<u32>,
    record_capacity: usize,
}

// SAFETY: a slot's record is written only through a handle whose refcount is
// exactly one (exclusive owner), or by the allocator before the handle exists.
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

impl PoolInner {
    fn release(&self, index: u32) {
        // Cannot fail: the free list has room for every slot
        if self.free.push(index).is_err() {
            tracing::error!(slot = index, "record pool free list overflow");
        }
    }
}

/// Fixed-capacity pool of records
///
/// Cheap to clone; clones share the same arena.
///
/// # Example
/// ```
/// use rt_gateway::infrastructure::pool::BufferPool;
///
/// let pool = BufferPool::new(2, 4);
/// let smp = pool.alloc().unwrap();
/// assert_eq!(pool.available(), 1);
/// drop(smp);
/// assert_eq!(pool.available(), 2);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Pre-allocate `count` records with room for `record_capacity` values each
    pub fn new(count: usize, record_capacity: usize) -> Self {
        let count = count.max(1);
        let slots = (0..count)
            .map(|_| Slot {
                refcnt: AtomicUsize::new(0),
                record: UnsafeCell::new(Record::with_capacity(record_capacity)),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let free = RingQueue::with_capacity(count);
        for index in 0..count as u32 {
            // Ring capacity >= count
            let _ = free.push(index);
        }

        Self {
            inner: Arc::new(PoolInner {
                slots,
                free,
                record_capacity,
            }),
        }
    }

    /// Take one empty record, `None` when exhausted
    #[inline]
    pub fn alloc(&self) -> Option<Smp> {
        let index = self.inner.free.pull()?;
        let slot = &self.inner.slots[index as usize];

        // SAFETY: the index came off the free list, nobody else references this slot.
        unsafe { (*slot.record.get()).reset() };
        slot.refcnt.store(1, Ordering::Release);

        Some(Smp {
            pool: Arc::clone(&self.inner),
            index,
        })
    }

    /// Append up to `n` fresh records to `out`
    ///
    /// Returns how many were allocated; fewer than `n` means the pool ran dry,
    /// which callers treat as an underrun, not an error.
    pub fn alloc_many(&self, out: &mut Vec<Smp>, n: usize) -> usize {
        let mut allocated = 0;
        while allocated < n {
            match self.alloc() {
                Some(smp) => {
                    out.push(smp);
                    allocated += 1;
                }
                None => break,
            }
        }
        allocated
    }

    /// Allocate a new record holding a copy of `src`
    ///
    /// The copy starts with a reference count of one.
    pub fn clone_record(&self, src: &Record) -> Option<Smp> {
        let mut smp = self.alloc()?;
        smp.get_mut()?.copy_from(src);
        Some(smp)
    }

    /// Take an extra reference on every handle
    pub fn get_many(smps: &[Smp]) -> Vec<Smp> {
        smps.to_vec()
    }

    /// Release every handle in `smps`, returning how many were dropped
    pub fn put_many(smps: &mut Vec<Smp>) -> usize {
        let n = smps.len();
        smps.clear();
        n
    }

    /// Total number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Slots currently on the free list (approximate under concurrency)
    #[inline]
    pub fn available(&self) -> usize {
        self.inner.free.available()
    }

    /// Slots referenced by at least one handle
    #[inline]
    pub fn in_use(&self) -> usize {
        self.len() - self.available()
    }

    /// Value capacity of every record in this pool
    #[inline]
    pub fn record_capacity(&self) -> usize {
        self.inner.record_capacity
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("len", &self.len())
            .field("available", &self.available())
            .field("record_capacity", &self.record_capacity())
            .finish()
    }
}

/// Owning handle to a pooled record
///
/// `Clone` takes another reference (no copy), `Drop` releases one. Reading
/// goes through `Deref`; writing needs exclusive ownership, see
/// [`Smp::get_mut`] and [`Smp::make_mut`].
pub struct Smp {
    pool: Arc<PoolInner>,
    index: u32,
}

impl Smp {
    #[inline]
    fn slot(&self) -> &Slot {
        &self.pool.slots[self.index as usize]
    }

    /// Current number of outstanding references
    #[inline]
    pub fn refcount(&self) -> usize {
        self.slot().refcnt.load(Ordering::Acquire)
    }

    /// Mutable access if this is the only reference
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut Record> {
        if self.refcount() != 1 {
            return None;
        }
        // SAFETY: refcount 1 and `&mut self` mean no other handle to this slot exists.
        Some(unsafe { &mut *self.slot().record.get() })
    }

    /// Mutable access, copying into a fresh slot first if shared
    ///
    /// Returns `None` if a copy was needed but the pool is exhausted.
    pub fn make_mut(&mut self) -> Option<&mut Record> {
        if self.refcount() != 1 {
            let pool = BufferPool {
                inner: Arc::clone(&self.pool),
            };
            *self = pool.clone_record(self)?;
        }
        self.get_mut()
    }

    /// `true` if both handles reference the same slot
    #[inline]
    pub fn ptr_eq(a: &Smp, b: &Smp) -> bool {
        Arc::ptr_eq(&a.pool, &b.pool) && a.index == b.index
    }

    /// Pool this record belongs to
    pub fn pool(&self) -> BufferPool {
        BufferPool {
            inner: Arc::clone(&self.pool),
        }
    }
}

impl Deref for Smp {
    type Target = Record;

    #[inline]
    fn deref(&self) -> &Record {
        // SAFETY: writers require refcount 1 and `&mut Smp`, which excludes this borrow.
        unsafe { &*self.slot().record.get() }
    }
}

impl Clone for Smp {
    #[inline]
    fn clone(&self) -> Self {
        self.slot().refcnt.fetch_add(1, Ordering::Relaxed);
        Self {
            pool: Arc::clone(&self.pool),
            index: self.index,
        }
    }
}

impl Drop for Smp {
    #[inline]
    fn drop(&mut self) {
        if self.slot().refcnt.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        self.pool.release(self.index);
    }
}

impl fmt::Debug for Smp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Smp")
            .field("slot", &self.index)
            .field("refcount", &self.refcount())
            .field("record", &**self)
            .finish()
    }
}
