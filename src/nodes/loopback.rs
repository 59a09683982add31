//! In-process loopback node
//!
//! Records written to the node are copied into its own pool and become
//! readable again, in order. Readiness is the internal queue's eventfd.

use super::{Capabilities, Node, NodeError};
use crate::core::record::{now, DEFAULT_SAMPLE_LENGTH};
use crate::infrastructure::config::{param_usize, NodeConfig, DEFAULT_QUEUELEN};
use crate::infrastructure::pool::{BufferPool, Smp};
use crate::infrastructure::signalled_queue::SignalledQueue;
use std::os::fd::RawFd;
use std::sync::Arc;

pub struct LoopbackNode {
    name: String,
    values: usize,
    vectorize: usize,
    pool: BufferPool,
    queue: SignalledQueue<Smp>,
}

impl LoopbackNode {
    pub const TYPE: &'static str = "loopback";

    pub fn new(name: &str, values: usize, queuelen: usize, vectorize: usize) -> Result<Self, NodeError> {
        let queue = SignalledQueue::with_capacity(queuelen).map_err(|source| NodeError::Io {
            node: name.to_string(),
            source,
        })?;

        Ok(Self {
            name: name.to_string(),
            values,
            vectorize: vectorize.max(1),
            pool: BufferPool::new(queue.capacity(), values),
            queue,
        })
    }

    pub fn from_config(name: &str, cfg: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        let invalid = |e: crate::infrastructure::config::ConfigError| NodeError::Config {
            node: name.to_string(),
            reason: e.to_string(),
        };
        let values = param_usize(&cfg.params, "values", DEFAULT_SAMPLE_LENGTH).map_err(invalid)?;
        let queuelen = param_usize(&cfg.params, "queuelen", DEFAULT_QUEUELEN).map_err(invalid)?;

        Ok(Arc::new(Self::new(name, values, queuelen, cfg.vectorize)?))
    }

    /// Records written but not read yet
    pub fn pending(&self) -> usize {
        self.queue.available()
    }
}

impl Node for LoopbackNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        Self::TYPE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_WRITE
    }

    fn vectorize(&self) -> usize {
        self.vectorize
    }

    fn sample_len(&self) -> usize {
        self.values
    }

    fn poll_fd(&self) -> Option<RawFd> {
        Some(self.queue.fd())
    }

    fn read(&self, smps: &mut [Smp]) -> Result<usize, NodeError> {
        let mut filled = 0;
        for slot in smps.iter_mut() {
            let Some(dst) = slot.get_mut() else { break };
            let Some(src) = self.queue.pull() else { break };

            dst.copy_from(&src);
            if dst.ts.received == 0 {
                dst.ts.received = now();
            }
            filled += 1;
        }
        Ok(filled)
    }

    fn write(&self, smps: &[Smp]) -> Result<usize, NodeError> {
        let mut copies = Vec::with_capacity(smps.len());
        for smp in smps {
            match self.pool.clone_record(smp) {
                Some(copy) => copies.push(copy),
                None => break,
            }
        }
        // Copies that do not fit are dropped here and return to the pool
        Ok(self.queue.push_many(&mut copies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Value;
    use crate::infrastructure::fd::wait_readable;
    use std::time::Duration;

    fn records(pool: &BufferPool, n: usize) -> Vec<Smp> {
        (0..n)
            .map(|i| {
                let mut smp = pool.alloc().unwrap();
                let r = smp.get_mut().unwrap();
                r.sequence = i as u64;
                r.assign(&[Value::Float(i as f64), Value::Integer(7)]);
                smp
            })
            .collect()
    }

    #[test]
    fn test_write_then_read_in_order() {
        let node = LoopbackNode::new("lo", 2, 8, 4).unwrap();
        let pool = BufferPool::new(8, 2);

        let batch = records(&pool, 3);
        assert_eq!(node.write(&batch).unwrap(), 3);
        assert_eq!(node.pending(), 3);
        assert!(wait_readable(node.poll_fd().unwrap(), Some(Duration::ZERO)).unwrap());

        let mut out = Vec::new();
        pool.alloc_many(&mut out, 4);
        assert_eq!(node.read(&mut out).unwrap(), 3);
        for (i, smp) in out.iter().take(3).enumerate() {
            assert_eq!(smp.sequence, i as u64);
            assert_eq!(smp.data()[0], Value::Float(i as f64));
            assert_ne!(smp.ts.received, 0);
        }
        assert_eq!(node.pending(), 0);
    }

    #[test]
    fn test_write_copies_and_truncates() {
        let node = LoopbackNode::new("lo", 1, 4, 1).unwrap();
        let pool = BufferPool::new(4, 2);
        let batch = records(&pool, 1);

        node.write(&batch).unwrap();
        // Caller keeps sole ownership of its record
        assert_eq!(batch[0].refcount(), 1);

        let mut out = vec![pool.alloc().unwrap()];
        node.read(&mut out).unwrap();
        assert_eq!(out[0].len(), 1);
    }

    #[test]
    fn test_write_overrun_reports_accepted() {
        let node = LoopbackNode::new("lo", 2, 2, 1).unwrap();
        let pool = BufferPool::new(8, 2);
        assert_eq!(node.write(&records(&pool, 5)).unwrap(), 2);
        assert_eq!(node.write(&records(&pool, 1)).unwrap(), 0);
    }

    #[test]
    fn test_from_config() {
        let cfg: NodeConfig = toml::from_str("type = \"loopback\"\nvalues = 6\nqueuelen = 3\nvectorize = 2").unwrap();
        let node = LoopbackNode::from_config("lo", &cfg).unwrap();
        assert_eq!(node.sample_len(), 6);
        assert_eq!(node.vectorize(), 2);
        assert_eq!(node.capabilities(), Capabilities::READ_WRITE);

        let bad: NodeConfig = toml::from_str("type = \"loopback\"\nvalues = \"many\"").unwrap();
        assert!(matches!(
            LoopbackNode::from_config("lo", &bad),
            Err(NodeError::Config { .. })
        ));
    }
}
