//! Ring queue coupled with a pollable readiness descriptor
//!
//! Successful pushes signal an eventfd, pulls drain it. The descriptor is
//! readable whenever the ring holds data: after draining, the consumer
//! re-checks the ring and re-signals if a producer raced in. Spurious
//! wake-ups are possible, missed ones are not.

use crate::infrastructure::fd::{self, EventFd};
use crate::infrastructure::ring_queue::RingQueue;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

#[derive(Debug)]
pub struct SignalledQueue<T> {
    queue: RingQueue<T>,
    event: EventFd,
}

impl<T> SignalledQueue<T> {
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            queue: RingQueue::with_capacity(capacity),
            event: EventFd::new()?,
        })
    }

    /// Descriptor for registration with a poll loop
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.event.as_raw_fd()
    }

    pub fn push(&self, value: T) -> Result<(), T> {
        self.queue.push(value)?;
        self.event.signal(1);
        Ok(())
    }

    /// See [`RingQueue::push_many`]; rejected elements stay in `items`
    pub fn push_many(&self, items: &mut Vec<T>) -> usize {
        let pushed = self.queue.push_many(items);
        if pushed > 0 {
            self.event.signal(pushed as u64);
        }
        pushed
    }

    /// Non-blocking pull
    pub fn pull(&self) -> Option<T> {
        let value = self.queue.pull();
        self.rearm();
        value
    }

    /// Non-blocking batch pull, appending up to `max` elements to `out`
    pub fn pull_many(&self, out: &mut Vec<T>, max: usize) -> usize {
        let pulled = self.queue.pull_many(out, max);
        self.rearm();
        pulled
    }

    /// Block until an element is available or `timeout` elapses
    ///
    /// `None` waits forever.
    pub fn pull_wait(&self, timeout: Option<Duration>) -> io::Result<Option<T>> {
        loop {
            if let Some(value) = self.pull() {
                return Ok(Some(value));
            }
            if !fd::wait_readable(self.fd(), timeout)? {
                return Ok(None);
            }
        }
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.queue.available()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    // Drain first, then look at the ring: a push that lands after the drain
    // either shows up in the check or signals after it.
    fn rearm(&self) {
        self.event.drain();
        if !self.queue.is_empty() {
            self.event.signal(1);
        }
    }
}
