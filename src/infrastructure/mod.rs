//! Infrastructure
//!
//! Lock-free queues and record pools used on the hot path, plus the cold
//! path pieces:
//! - Logging and metrics
//! - Configuration management
//! - HTTP status API

pub mod api;
pub mod config;
pub mod fd;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod ring_queue;
pub mod signalled_queue;

pub use api::{start_server, AppState};
pub use pool::{BufferPool, Smp};
pub use ring_queue::RingQueue;
pub use signalled_queue::SignalledQueue;
