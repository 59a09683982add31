//! Real-time sample routing gateway
//!
//! Moves timestamped records from source nodes through configurable paths
//! to destination nodes. Paths multiplex several sources into one composite
//! record, run it through a hook pipeline and fan it out.

pub mod core;
pub mod gateway;
pub mod hooks;
pub mod hot_path;
pub mod infrastructure;
pub mod nodes;

#[cfg(test)]
pub mod test_utils;

pub use gateway::Gateway;
pub use infrastructure::config::{ApiConfig, Config, GatewayConfig};

use thiserror::Error;

/// Top-level error type of the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] infrastructure::config::ConfigError),

    #[error("node error: {0}")]
    Node(#[from] nodes::NodeError),

    #[error("path error: {0}")]
    Path(#[from] hot_path::path::PathError),

    #[error("worker error: {0}")]
    Worker(#[from] hot_path::path_worker::WorkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;
