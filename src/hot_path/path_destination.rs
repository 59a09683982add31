//! Output side of a path
//!
//! Fan-out pushes shared references into the destination's signalled queue;
//! the worker drains the queue into the node when its eventfd becomes
//! readable. Delivery is best effort: records the node does not accept are
//! released, never requeued.

use crate::infrastructure::metrics::PathMetrics;
use crate::infrastructure::pool::{BufferPool, Smp};
use crate::infrastructure::signalled_queue::SignalledQueue;
use crate::nodes::{Node, NodeError};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct PathDestination {
    node: Arc<dyn Node>,
    queue: SignalledQueue<Smp>,
    path: String,
    metrics: Arc<PathMetrics>,
}

impl PathDestination {
    pub fn new(node: Arc<dyn Node>, queuelen: usize, path: &str, metrics: Arc<PathMetrics>) -> io::Result<Self> {
        Ok(Self {
            node,
            queue: SignalledQueue::with_capacity(queuelen)?,
            path: path.to_string(),
            metrics,
        })
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    /// Readiness descriptor of the pending queue
    pub fn fd(&self) -> RawFd {
        self.queue.fd()
    }

    /// Records waiting to be written
    pub fn pending(&self) -> usize {
        self.queue.available()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Take a reference on each record and queue it
    ///
    /// Returns how many were queued; the rest are an overrun and released.
    pub fn enqueue(&self, smps: &[Smp]) -> usize {
        let mut refs = BufferPool::get_many(smps);
        let queued = self.queue.push_many(&mut refs);

        if !refs.is_empty() {
            warn!(target: "path", path = %self.path, node = self.node.name(), dropped = refs.len(), "queue overrun");
            self.metrics.record_queue_overrun(refs.len() as u64);
        }
        self.metrics.record_enqueued(queued as u64);
        queued
    }

    /// Write everything queued to the node in batches of its vectorize size
    ///
    /// Returns how many records the node accepted.
    pub fn drain(&self) -> Result<usize, NodeError> {
        let cnt = self.node.vectorize().max(1);
        let mut batch = Vec::with_capacity(cnt);
        let mut total = 0;

        loop {
            let available = self.queue.pull_many(&mut batch, cnt);
            if available == 0 {
                break;
            }
            if available < cnt {
                trace!(target: "path", path = %self.path, available, expected = cnt, "queue underrun");
            }

            // The batch is released on every exit path when it goes out of scope
            let sent = self.node.write(&batch)?;
            if sent < available {
                warn!(target: "path", path = %self.path, node = self.node.name(), sent, available, "partial write");
                self.metrics.record_partial_write((available - sent) as u64);
            }
            debug!(target: "path", path = %self.path, node = self.node.name(), sent, "sent records");

            total += sent;
            BufferPool::put_many(&mut batch);
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Value;
    use crate::infrastructure::fd::wait_readable;
    use crate::nodes::{Capabilities, LoopbackNode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Accepts at most `limit` records per write and counts calls
    struct Throttled {
        limit: usize,
        writes: AtomicUsize,
    }

    impl Node for Throttled {
        fn name(&self) -> &str {
            "throttled"
        }

        fn kind(&self) -> &'static str {
            "test"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::WRITE_ONLY
        }

        fn vectorize(&self) -> usize {
            2
        }

        fn write(&self, smps: &[Smp]) -> Result<usize, NodeError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(smps.len().min(self.limit))
        }
    }

    fn records(pool: &BufferPool, n: usize) -> Vec<Smp> {
        (0..n)
            .map(|i| {
                let mut smp = pool.alloc().unwrap();
                let r = smp.get_mut().unwrap();
                r.sequence = i as u64;
                r.assign(&[Value::Integer(i as i64)]);
                smp
            })
            .collect()
    }

    #[test]
    fn test_enqueue_shares_and_signals() {
        let pool = BufferPool::new(8, 1);
        let node: Arc<dyn Node> = Arc::new(LoopbackNode::new("lo", 1, 8, 1).unwrap());
        let dest = PathDestination::new(node, 4, "p", Arc::new(PathMetrics::new())).unwrap();

        let smps = records(&pool, 2);
        assert_eq!(dest.enqueue(&smps), 2);
        assert_eq!(smps[0].refcount(), 2);
        assert!(wait_readable(dest.fd(), Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn test_enqueue_overrun_counted() {
        let pool = BufferPool::new(8, 1);
        let metrics = Arc::new(PathMetrics::new());
        let node: Arc<dyn Node> = Arc::new(LoopbackNode::new("lo", 1, 8, 1).unwrap());
        let dest = PathDestination::new(node, 2, "p", Arc::clone(&metrics)).unwrap();

        let smps = records(&pool, 5);
        let queued: usize = smps.chunks(1).map(|c| dest.enqueue(c)).sum();
        assert_eq!(queued, 2);
        assert_eq!(metrics.snapshot().queue_overruns, 3);
        // Overrun references were released again
        assert_eq!(smps[4].refcount(), 1);
    }

    #[test]
    fn test_drain_delivers_in_order() {
        let pool = BufferPool::new(8, 1);
        let lo = Arc::new(LoopbackNode::new("lo", 1, 8, 1).unwrap());
        let dest = PathDestination::new(lo.clone(), 8, "p", Arc::new(PathMetrics::new())).unwrap();

        dest.enqueue(&records(&pool, 3));
        assert_eq!(dest.drain().unwrap(), 3);
        assert_eq!(dest.pending(), 0);
        // Everything went back to the path pool
        assert_eq!(pool.in_use(), 0);

        let mut out = Vec::new();
        pool.alloc_many(&mut out, 3);
        assert_eq!(lo.read(&mut out).unwrap(), 3);
        let seqs: Vec<_> = out.iter().map(|s| s.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_partial_write_releases_everything() {
        let pool = BufferPool::new(8, 1);
        let metrics = Arc::new(PathMetrics::new());
        let node = Arc::new(Throttled {
            limit: 1,
            writes: AtomicUsize::new(0),
        });
        let dest = PathDestination::new(node.clone(), 8, "p", Arc::clone(&metrics)).unwrap();

        dest.enqueue(&records(&pool, 3));
        assert_eq!(dest.drain().unwrap(), 2);
        // Batches of two, then one
        assert_eq!(node.writes.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.snapshot().partial_writes, 1);
        assert_eq!(pool.in_use(), 0);
    }
}
