//! Per-record routing
//!
//! This module contains latency-critical code:
//! - Source merge into the composite record
//! - Destination queues and delivery
//! - The poll loop driving both

pub mod path;
pub mod path_destination;
pub mod path_source;
pub mod path_worker;

pub use path::{Path, PathCore, PathError, PathInfo, PathMode, PathState};
pub use path_destination::PathDestination;
pub use path_source::PathSource;
pub use path_worker::{JobId, PathJob, PathWorker, WorkerError};
