//! Timestamped sample records
//!
//! A record is a fixed-capacity vector of tagged scalars plus a header
//! (sequence number, origin/receipt timestamps). Records live in pool slots
//! and are only written while exclusively owned.

use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default number of values per composite record when no mapping sizes it
pub const DEFAULT_SAMPLE_LENGTH: usize = 64;

/// Nanoseconds since the UNIX epoch; 0 means "not set"
pub type Timestamp = u64;

/// Current wall-clock time as a [`Timestamp`]
#[inline]
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as Timestamp
}

/// A single signal value, tagged with its format
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Integer(i64),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Float(f) => f,
            Value::Integer(i) => i as f64,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Value::Float(f) => f as i64,
            Value::Integer(i) => i,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Float(0.0)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
        }
    }
}

/// Origin and receipt timestamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    /// When the sample was produced at its source
    pub origin: Timestamp,
    /// When this process received it
    pub received: Timestamp,
}

/// Fixed-capacity sample record
///
/// `capacity` slots are allocated once; `len()` of them are in use.
#[derive(Clone, PartialEq)]
pub struct Record {
    pub sequence: u64,
    pub ts: Timestamps,
    data: Box<[Value]>,
    length: usize,
}

impl Record {
    /// Create an empty record with room for `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sequence: 0,
            ts: Timestamps::default(),
            data: vec![Value::default(); capacity].into_boxed_slice(),
            length: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Used values
    #[inline]
    pub fn data(&self) -> &[Value] {
        &self.data[..self.length]
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [Value] {
        &mut self.data[..self.length]
    }

    /// Set the used length, zero-filling newly exposed slots
    ///
    /// Clamped to capacity; returns the resulting length.
    pub fn set_len(&mut self, len: usize) -> usize {
        let len = len.min(self.capacity());
        for v in &mut self.data[self.length.min(len)..len] {
            *v = Value::default();
        }
        self.length = len;
        len
    }

    /// Write `values` starting at `offset`, growing `len()` as needed
    ///
    /// Values past capacity are dropped; returns the number written.
    pub fn write_at(&mut self, offset: usize, values: &[Value]) -> usize {
        if offset >= self.capacity() {
            return 0;
        }
        let n = values.len().min(self.capacity() - offset);
        if offset + n > self.length {
            self.set_len(offset + n);
        }
        self.data[offset..offset + n].copy_from_slice(&values[..n]);
        n
    }

    /// Replace the contents with `values` (truncated to capacity)
    pub fn assign(&mut self, values: &[Value]) -> usize {
        self.length = 0;
        self.write_at(0, values)
    }

    /// Copy header and payload from `other`, truncating to this capacity
    pub fn copy_from(&mut self, other: &Record) {
        self.sequence = other.sequence;
        self.ts = other.ts;
        self.assign(other.data());
    }

    /// Reset to a pristine, empty state
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.ts = Timestamps::default();
        self.length = 0;
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("sequence", &self.sequence)
            .field("ts", &self.ts)
            .field("data", &self.data())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(values: &[f64]) -> Vec<Value> {
        values.iter().copied().map(Value::Float).collect()
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut r = Record::with_capacity(4);
        assert_eq!(r.set_len(10), 4);
        assert_eq!(r.len(), 4);

        assert_eq!(r.assign(&floats(&[1.0, 2.0, 3.0, 4.0, 5.0])), 4);
        assert_eq!(r.data(), floats(&[1.0, 2.0, 3.0, 4.0]).as_slice());
    }

    #[test]
    fn test_write_at_zero_fills_gap() {
        let mut r = Record::with_capacity(8);
        r.write_at(2, &floats(&[7.0, 8.0]));
        assert_eq!(r.len(), 4);
        assert_eq!(r.data(), floats(&[0.0, 0.0, 7.0, 8.0]).as_slice());
    }

    #[test]
    fn test_shrink_then_grow_clears_stale_values() {
        let mut r = Record::with_capacity(4);
        r.assign(&floats(&[1.0, 2.0, 3.0]));
        r.set_len(1);
        r.set_len(3);
        assert_eq!(r.data(), floats(&[1.0, 0.0, 0.0]).as_slice());
    }

    #[test]
    fn test_copy_from_truncates() {
        let mut big = Record::with_capacity(6);
        big.sequence = 9;
        big.ts.origin = 100;
        big.assign(&floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));

        let mut small = Record::with_capacity(3);
        small.copy_from(&big);
        assert_eq!(small.sequence, 9);
        assert_eq!(small.ts.origin, 100);
        assert_eq!(small.len(), 3);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Integer(3).as_f64(), 3.0);
        assert_eq!(Value::Float(2.9).as_i64(), 2);
        assert_eq!(Value::default(), Value::Float(0.0));
        assert_eq!(Value::from(5i64).to_string(), "5");
    }
}
