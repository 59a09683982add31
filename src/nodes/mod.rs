//! Endpoint abstraction
//!
//! A node is anything records can be read from or written to. Concrete
//! transport adapters live outside this crate; the in-process `loopback` and
//! `signal` types are built in. Node types are looked up by name in an
//! explicit [`NodeRegistry`] populated at start-up.

pub mod loopback;
pub mod signal;

pub use loopback::LoopbackNode;
pub use signal::SignalNode;

use crate::core::record::DEFAULT_SAMPLE_LENGTH;
use crate::infrastructure::config::NodeConfig;
use crate::infrastructure::pool::Smp;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("node '{node}' does not support {op}")]
    Unsupported { node: String, op: &'static str },

    #[error("I/O error on node '{node}': {source}")]
    Io {
        node: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration for node '{node}': {reason}")]
    Config { node: String, reason: String },

    #[error("unknown node type '{0}'")]
    UnknownType(String),
}

/// What a node can be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
}

impl Capabilities {
    pub const READ_ONLY: Capabilities = Capabilities { read: true, write: false };
    pub const WRITE_ONLY: Capabilities = Capabilities { read: false, write: true };
    pub const READ_WRITE: Capabilities = Capabilities { read: true, write: true };
}

/// Endpoint contract consumed by paths and the worker
///
/// Calls made by the worker must not block: a node that may block exposes a
/// descriptor through [`Node::poll_fd`] and is only read once it is readable.
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Registered type name
    fn kind(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Preferred batch size for read and write calls
    fn vectorize(&self) -> usize {
        1
    }

    /// Number of data values per record this node produces
    fn sample_len(&self) -> usize {
        DEFAULT_SAMPLE_LENGTH
    }

    /// Readiness-for-read descriptor, if the node has one
    fn poll_fd(&self) -> Option<RawFd> {
        None
    }

    fn start(&self) -> Result<(), NodeError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Fill freshly allocated records, returning how many were filled
    ///
    /// `Ok(0)` means nothing is available right now.
    fn read(&self, _smps: &mut [Smp]) -> Result<usize, NodeError> {
        Err(NodeError::Unsupported {
            node: self.name().to_string(),
            op: "read",
        })
    }

    /// Send records, returning how many were accepted (may be fewer)
    fn write(&self, _smps: &[Smp]) -> Result<usize, NodeError> {
        Err(NodeError::Unsupported {
            node: self.name().to_string(),
            op: "write",
        })
    }
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Identity comparison for shared nodes
#[inline]
pub fn same_node(a: &Arc<dyn Node>, b: &Arc<dyn Node>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Constructor signature for a node type
pub type NodeFactory = fn(name: &str, cfg: &NodeConfig) -> Result<Arc<dyn Node>, NodeError>;

/// Explicit table of node types
#[derive(Clone)]
pub struct NodeRegistry {
    factories: HashMap<&'static str, NodeFactory>,
}

impl NodeRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the in-process node types
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(LoopbackNode::TYPE, LoopbackNode::from_config);
        registry.register(SignalNode::TYPE, SignalNode::from_config);
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: NodeFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn create(&self, name: &str, cfg: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        let factory = self
            .factories
            .get(cfg.kind.as_str())
            .ok_or_else(|| NodeError::UnknownType(cfg.kind.clone()))?;
        factory(name, cfg)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Name-indexed set of instantiated nodes
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    nodes: HashMap<String, Arc<dyn Node>>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.name().to_string(), node);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Node>> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
