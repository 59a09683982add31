//! Per-path counters
//!
//! Lock-free metrics counters using atomic operations.
//! Collected in hot path, exported via API in cold path.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

/// Counters for one path
///
/// Thread-safe counters updated from the worker and source threads.
/// Snapshots taken for API export.
#[derive(Debug)]
pub struct PathMetrics {
    /// Source records merged into the composite record
    merged: AtomicU64,
    /// Pipeline firings
    fired: AtomicU64,
    /// Records handed to destination queues
    enqueued: AtomicU64,
    /// Lost compare-and-swap races while merging
    cas_retries: AtomicU64,
    /// Allocations the pool could not satisfy
    pool_underruns: AtomicU64,
    /// Records rejected by full destination queues
    queue_overruns: AtomicU64,
    /// Records dequeued but not accepted by a destination node
    partial_writes: AtomicU64,
    /// Records discarded by hooks
    hook_drops: AtomicU64,
    /// Last firing timestamp (Unix millis)
    last_fired: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for API export
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PathMetricsSnapshot {
    pub merged: u64,
    pub fired: u64,
    pub enqueued: u64,
    pub cas_retries: u64,
    pub pool_underruns: u64,
    pub queue_overruns: u64,
    pub partial_writes: u64,
    pub hook_drops: u64,
    pub fire_rate: f64, // firings per second
    pub last_fired_ms: u64,
    pub uptime_seconds: u64,
}

impl PathMetrics {
    pub fn new() -> Self {
        Self {
            merged: AtomicU64::new(0),
            fired: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            cas_retries: AtomicU64::new(0),
            pool_underruns: AtomicU64::new(0),
            queue_overruns: AtomicU64::new(0),
            partial_writes: AtomicU64::new(0),
            hook_drops: AtomicU64::new(0),
            last_fired: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_merged(&self, n: u64) {
        self.merged.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fired(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_fired.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enqueued(&self, n: u64) {
        self.enqueued.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pool_underrun(&self, n: u64) {
        self.pool_underruns.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queue_overrun(&self, n: u64) {
        self.queue_overruns.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_partial_write(&self, n: u64) {
        self.partial_writes.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hook_drops(&self, n: u64) {
        self.hook_drops.fetch_add(n, Ordering::Relaxed);
    }

    /// Total firings so far
    #[inline]
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> PathMetricsSnapshot {
        let fired = self.fired.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            fired as f64 / uptime as f64
        } else {
            0.0
        };

        PathMetricsSnapshot {
            merged: self.merged.load(Ordering::Relaxed),
            fired,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            pool_underruns: self.pool_underruns.load(Ordering::Relaxed),
            queue_overruns: self.queue_overruns.load(Ordering::Relaxed),
            partial_writes: self.partial_writes.load(Ordering::Relaxed),
            hook_drops: self.hook_drops.load(Ordering::Relaxed),
            fire_rate: rate,
            last_fired_ms: self.last_fired.load(Ordering::Relaxed),
            uptime_seconds: uptime,
        }
    }
}

impl Default for PathMetrics {
    fn default() -> Self {
        Self::new()
    }
}
