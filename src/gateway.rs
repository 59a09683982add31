//! Gateway orchestration
//!
//! Instantiates nodes and paths from configuration and drives their
//! lifecycle around one shared path worker. Lives on the control plane.

use crate::hooks::HookRegistry;
use crate::hot_path::path::{Path, PathInfo, PathState};
use crate::hot_path::path_worker::PathWorker;
use crate::infrastructure::config::Config;
use crate::nodes::{Node, NodeDirectory, NodeRegistry};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

/// Serializable view of a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub vectorize: usize,
    pub values: usize,
    pub readable: bool,
    pub writable: bool,
    /// Number of paths using the node
    pub paths: usize,
}

pub struct Gateway {
    nodes: NodeDirectory,
    paths: Vec<Path>,
    worker: Arc<PathWorker>,
    running: bool,
}

impl Gateway {
    /// Build nodes and paths with the built-in node and hook types
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_registries(config, &NodeRegistry::builtin(), &HookRegistry::builtin())
    }

    pub fn with_registries(config: &Config, node_types: &NodeRegistry, hook_types: &HookRegistry) -> Result<Self> {
        let mut nodes = NodeDirectory::new();
        for (name, cfg) in &config.nodes {
            nodes.insert(node_types.create(name, cfg)?);
        }

        let mut paths = Vec::with_capacity(config.paths.len());
        for cfg in &config.paths {
            let path = Path::from_config(cfg, &nodes, hook_types)?;
            let reversed = if path.wants_reverse() {
                let mut reversed = path.reverse(hook_types)?;
                reversed.check()?;
                Some(reversed)
            } else {
                None
            };

            info!(target: "path", path = path.name(), uuid = %path.uuid(), "configured path");
            paths.push(path);
            paths.extend(reversed);
        }

        Ok(Self {
            nodes,
            paths,
            worker: PathWorker::new()?,
            running: false,
        })
    }

    /// Start every node in use, every enabled path and the worker thread
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        for node in self.nodes.iter() {
            if self.paths.iter().any(|p| p.is_enabled() && p.uses_node(node)) {
                node.start()?;
                crate::log_node!(Level::INFO, node = node.name(), kind = node.kind(), "started node");
            }
        }

        for i in 0..self.paths.len() {
            if !self.paths[i].is_enabled() {
                info!(target: "path", path = self.paths[i].name(), "path disabled, not starting");
                continue;
            }
            if let Err(e) = self.paths[i].start(&self.worker) {
                error!(target: "path", path = self.paths[i].name(), error = %e, "failed to start path");
                self.shutdown();
                return Err(e.into());
            }
        }

        self.worker.start()?;
        self.running = true;
        info!(paths = self.paths.len(), nodes = self.nodes.len(), "gateway started");
        Ok(())
    }

    /// Stop paths, the worker and nodes
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.shutdown();
        self.running = false;
        info!("gateway stopped");
    }

    fn shutdown(&mut self) {
        for path in self.paths.iter_mut().filter(|p| p.state() == PathState::Started) {
            if let Err(e) = path.stop() {
                warn!(target: "path", path = path.name(), error = %e, "failed to stop path");
            }
        }
        self.worker.stop();

        for node in self.nodes.iter() {
            if let Err(e) = node.stop() {
                crate::log_node!(Level::WARN, node = node.name(), error = %e, "failed to stop node");
            }
        }
    }

    /// Periodic tick for the hooks of every started path
    pub fn periodic(&self) {
        for path in &self.paths {
            path.periodic();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn nodes(&self) -> &NodeDirectory {
        &self.nodes
    }

    pub fn worker(&self) -> &Arc<PathWorker> {
        &self.worker
    }

    pub fn path_info(&self) -> Vec<PathInfo> {
        self.paths.iter().map(Path::info).collect()
    }

    pub fn node_info(&self) -> Vec<NodeInfo> {
        let mut info: Vec<NodeInfo> = self.nodes.iter().map(|n| self.describe(n)).collect();
        info.sort_by(|a, b| a.name.cmp(&b.name));
        info
    }

    fn describe(&self, node: &Arc<dyn Node>) -> NodeInfo {
        let caps = node.capabilities();
        NodeInfo {
            name: node.name().to_string(),
            kind: node.kind(),
            vectorize: node.vectorize(),
            values: node.sample_len(),
            readable: caps.read,
            writable: caps.write,
            paths: self.paths.iter().filter(|p| p.uses_node(node)).count(),
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayError;

    const CONFIG: &str = r#"
        [nodes.gen]
        type = "signal"
        signal = "counter"
        rate = 50
        values = 2

        [nodes.lo]
        type = "loopback"
        values = 2

        [nodes.back]
        type = "loopback"
        values = 2

        [[paths]]
        in = "gen"
        out = "lo"

        [[paths]]
        in = "lo"
        out = "back"
        reverse = true
    "#;

    #[test]
    fn test_from_config_builds_paths_and_reverse() {
        let config: Config = CONFIG.parse().unwrap();
        let gw = Gateway::from_config(&config).unwrap();

        assert_eq!(gw.nodes().len(), 3);
        let names: Vec<_> = gw.paths().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["[ gen ] => [ lo ]", "[ lo ] => [ back ]", "[ back ] => [ lo ]"]);
        assert!(gw.paths().iter().all(|p| p.state() == PathState::Checked));

        let nodes = gw.node_info();
        assert_eq!(nodes[0].name, "back");
        assert_eq!(nodes[2].name, "lo");
        assert_eq!(nodes[2].paths, 3);
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let config: Config = "[nodes.x]\ntype = \"carrier-pigeon\"".parse().unwrap();
        assert!(matches!(Gateway::from_config(&config), Err(GatewayError::Node(_))));
    }

    #[test]
    fn test_start_stop() {
        let config: Config = CONFIG.parse().unwrap();
        let mut gw = Gateway::from_config(&config).unwrap();

        gw.start().unwrap();
        assert!(gw.is_running());
        assert!(gw.worker().is_running());
        assert!(gw.paths().iter().all(|p| p.state() == PathState::Started));
        gw.periodic();

        gw.stop();
        assert!(!gw.worker().is_running());
        assert!(gw.paths().iter().all(|p| p.state() == PathState::Stopped));
        assert_eq!(gw.worker().job_count(), 0);
    }
}
