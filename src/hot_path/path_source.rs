//! Input side of a path and the merge into the composite record
//!
//! Every source publishes its contribution by cloning the path's current
//! composite record, applying its mappings and swapping the result in with a
//! compare-and-swap. Concurrent sources never block each other; a lost race
//! is simply retried against the newer composite.

use crate::core::mapping::{remap, MappingEntry};
use crate::hot_path::path::{PathCore, PathMode};
use crate::infrastructure::pool::{BufferPool, Smp};
use crate::nodes::{Node, NodeError};
use std::sync::Arc;
use tracing::{trace, warn};

pub struct PathSource {
    node: Arc<dyn Node>,
    index: usize,
    masked: bool,
    mappings: Vec<MappingEntry>,
    /// Buffers for records read from the node
    pool: BufferPool,
}

impl PathSource {
    pub fn new(node: Arc<dyn Node>, index: usize, masked: bool, mappings: Vec<MappingEntry>) -> Self {
        let batch = node.vectorize().max(1);
        let pool = BufferPool::new(batch * 2, node.sample_len());
        Self {
            node,
            index,
            masked,
            mappings,
            pool,
        }
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    /// Bit position in the path's `received` and `mask` sets
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether arrivals from this source count toward firing
    pub fn is_masked(&self) -> bool {
        self.masked
    }

    pub fn mappings(&self) -> &[MappingEntry] {
        &self.mappings
    }

    /// Read one batch of up to `vectorize` records from the node
    ///
    /// An exhausted read pool yields an empty batch.
    pub fn read(&self) -> Result<Vec<Smp>, NodeError> {
        let want = self.node.vectorize().max(1);
        let mut smps = Vec::with_capacity(want);

        let allocated = self.pool.alloc_many(&mut smps, want);
        if allocated == 0 {
            warn!(target: "path", node = self.node.name(), "read pool exhausted");
            return Ok(smps);
        }

        let n = self.node.read(&mut smps)?;
        smps.truncate(n.min(allocated));
        trace!(target: "path", node = self.node.name(), received = smps.len(), "read records");
        Ok(smps)
    }

    /// Merge a batch read from this source's node into the path
    ///
    /// In `all` mode only the newest record of the batch is used. Returns
    /// `true` if the path fired.
    pub fn merge(&self, core: &PathCore, batch: &[Smp]) -> bool {
        core.inspect(self.index, batch);
        let batch = match (core.mode, batch.len()) {
            (_, 0) => return false,
            (PathMode::All, n) => &batch[n - 1..],
            (PathMode::Any, _) => batch,
        };

        let mut muxed = Vec::with_capacity(batch.len());
        for (i, raw) in batch.iter().enumerate() {
            match core.publish(|r| remap(&self.mappings, r, raw)) {
                Some(smp) => muxed.push(smp),
                None => {
                    let missing = batch.len() - i;
                    warn!(target: "path", path = core.name(), node = self.node.name(), missing, "pool underrun while merging");
                    core.metrics().record_pool_underrun(missing as u64);
                    break;
                }
            }
        }
        if muxed.is_empty() {
            return false;
        }
        core.metrics().record_merged(muxed.len() as u64);

        // Marked after publishing so a round never completes on a missing update
        core.received.insert(self.index);
        if !self.masked {
            return false;
        }

        let fire = match core.mode {
            PathMode::Any => {
                core.received.clear();
                true
            }
            PathMode::All => core.received.claim_round(core.mask),
        };
        if fire {
            core.mark_fired();
            core.fire(muxed);
        }
        fire
    }

    /// Read from the node and merge what arrived
    pub fn poll(&self, core: &PathCore) -> Result<bool, NodeError> {
        let batch = self.read()?;
        Ok(self.merge(core, &batch))
    }
}

impl std::fmt::Debug for PathSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathSource")
            .field("node", &self.node.name())
            .field("index", &self.index)
            .field("masked", &self.masked)
            .field("mappings", &self.mappings.len())
            .finish()
    }
}
