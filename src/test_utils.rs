//! Test utilities for driving nodes and paths
//!
//! Loopback nodes stand in for real endpoints: records written to one can be
//! read back from it.

use crate::core::record::Value;
use crate::infrastructure::pool::{BufferPool, Smp};
use crate::nodes::{LoopbackNode, Node, NodeDirectory};
use std::sync::Arc;

/// Loopback node with room for 16 queued records
pub fn loopback(name: &str, values: usize) -> Arc<LoopbackNode> {
    Arc::new(LoopbackNode::new(name, values, 16, 1).unwrap())
}

pub fn directory(nodes: &[&Arc<LoopbackNode>]) -> NodeDirectory {
    let mut dir = NodeDirectory::new();
    for node in nodes {
        dir.insert(Arc::clone(*node) as Arc<dyn Node>);
    }
    dir
}

/// Write one record into `node`
pub fn send(node: &dyn Node, seq: u64, values: &[f64]) {
    let pool = BufferPool::new(1, values.len().max(1));
    let mut smp = pool.alloc().unwrap();
    let r = smp.get_mut().unwrap();
    r.sequence = seq;
    r.assign(&values.iter().copied().map(Value::Float).collect::<Vec<_>>());
    assert_eq!(node.write(&[smp]).unwrap(), 1);
}

/// Read up to `max` records from `node`
pub fn receive(node: &dyn Node, max: usize) -> Vec<Smp> {
    let pool = BufferPool::new(max, node.sample_len());
    let mut smps = Vec::with_capacity(max);
    pool.alloc_many(&mut smps, max);
    let n = node.read(&mut smps).unwrap();
    smps.truncate(n);
    smps
}

pub fn floats(smp: &Smp) -> Vec<f64> {
    smp.data().iter().map(|v| v.as_f64()).collect()
}
