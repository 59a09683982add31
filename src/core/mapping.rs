//! Field mappings from source records into a path's composite record
//!
//! Grammar of a mapping string:
//!
//! ```text
//! node                      all data values of `node`
//! node.data                 same
//! node.data[i]              single value i
//! node.data[i-j]            values i..=j
//! node.hdr                  sequence and length
//! node.hdr.sequence | node.hdr.length
//! node.ts                   origin and received timestamps
//! node.ts.origin | node.ts.received
//! ```

use crate::core::record::{Record, Value};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("empty mapping")]
    Empty,

    #[error("unknown node '{0}' in mapping")]
    UnknownNode(String),

    #[error("invalid mapping '{mapping}': {reason}")]
    Invalid { mapping: String, reason: String },
}

/// Which part of the source record an entry copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Data values
    Data,
    /// Header fields: `[sequence, length]`
    Header,
    /// Timestamps: `[origin, received]`
    Timestamp,
}

/// One contiguous slice of the composite record fed by one source node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// Source node name
    pub node: String,
    pub kind: MappingKind,
    /// First field taken from the source
    pub first: usize,
    /// Position in the composite record
    pub offset: usize,
    /// Number of values
    pub length: usize,
}

impl MappingEntry {
    /// Parse a mapping string
    ///
    /// `sample_len` resolves a node name to the number of data values it
    /// produces; `None` means the node does not exist. The returned entry has
    /// offset 0; callers place it with [`MappingEntry::at`].
    pub fn parse<F>(spec: &str, sample_len: F) -> Result<Self, MappingError>
    where
        F: Fn(&str) -> Option<usize>,
    {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(MappingError::Empty);
        }

        let invalid = |reason: &str| MappingError::Invalid {
            mapping: spec.to_string(),
            reason: reason.to_string(),
        };

        let (node, rest) = match spec.split_once('.') {
            Some((node, rest)) => (node, Some(rest)),
            None => (spec, None),
        };
        if node.is_empty() {
            return Err(invalid("missing node name"));
        }
        let node_len = sample_len(node).ok_or_else(|| MappingError::UnknownNode(node.to_string()))?;

        let (kind, first, length) = match rest {
            None | Some("data") => (MappingKind::Data, 0, node_len),
            Some("hdr") => (MappingKind::Header, 0, 2),
            Some("hdr.sequence") => (MappingKind::Header, 0, 1),
            Some("hdr.length") => (MappingKind::Header, 1, 1),
            Some("ts") => (MappingKind::Timestamp, 0, 2),
            Some("ts.origin") => (MappingKind::Timestamp, 0, 1),
            Some("ts.received") => (MappingKind::Timestamp, 1, 1),
            Some(other) => {
                let range = other
                    .strip_prefix("data[")
                    .and_then(|r| r.strip_suffix(']'))
                    .ok_or_else(|| invalid("unknown field selector"))?;
                let (first, last) = parse_range(range).ok_or_else(|| invalid("bad index range"))?;
                if last < first {
                    return Err(invalid("range end before start"));
                }
                if last >= node_len {
                    return Err(invalid(&format!("index {} out of range for {} values", last, node_len)));
                }
                (MappingKind::Data, first, last - first + 1)
            }
        };

        if length == 0 {
            return Err(invalid("mapping selects no values"));
        }

        Ok(Self {
            node: node.to_string(),
            kind,
            first,
            offset: 0,
            length,
        })
    }

    /// Same entry placed at `offset` in the composite record
    pub fn at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// One past the last composite index this entry writes
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Copy this entry's fields from `src` into `dst`
    pub fn apply(&self, dst: &mut Record, src: &Record) {
        match self.kind {
            MappingKind::Data => {
                let data = src.data();
                let start = self.first.min(data.len());
                let end = (self.first + self.length).min(data.len());
                dst.write_at(self.offset, &data[start..end]);
            }
            MappingKind::Header => {
                let fields = [
                    Value::Integer(src.sequence as i64),
                    Value::Integer(src.len() as i64),
                ];
                dst.write_at(self.offset, &fields[self.first..self.first + self.length]);
            }
            MappingKind::Timestamp => {
                let fields = [
                    Value::Integer(src.ts.origin as i64),
                    Value::Integer(src.ts.received as i64),
                ];
                dst.write_at(self.offset, &fields[self.first..self.first + self.length]);
            }
        }
    }
}

impl fmt::Display for MappingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            MappingKind::Data => "data",
            MappingKind::Header => "hdr",
            MappingKind::Timestamp => "ts",
        };
        write!(
            f,
            "{}.{}[{}-{}] -> [{}..{})",
            self.node,
            kind,
            self.first,
            self.first + self.length - 1,
            self.offset,
            self.end()
        )
    }
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let i = range.trim().parse().ok()?;
            Some((i, i))
        }
    }
}

/// Apply every entry of one source, and carry over its timestamps
pub fn remap(entries: &[MappingEntry], dst: &mut Record, src: &Record) {
    for entry in entries {
        entry.apply(dst, src);
    }
    dst.ts = src.ts;
}

/// Composite record length covering all entries
pub fn sample_length<'a>(entries: impl IntoIterator<Item = &'a MappingEntry>) -> usize {
    entries.into_iter().map(MappingEntry::end).max().unwrap_or(0)
}
