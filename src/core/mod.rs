//! Data model shared by nodes, hooks and paths
//!
//! - `record`: timestamped value records
//! - `mapping`: how source fields are placed in a composite record
//! - `bitset`: per-path source sets for trigger decisions

pub mod bitset;
pub mod mapping;
pub mod record;

pub use bitset::{AtomicSourceSet, SourceMask, MAX_SOURCES};
pub use mapping::{MappingEntry, MappingError, MappingKind};
pub use record::{Record, Timestamp, Value};
