//! Source bitsets for path trigger decisions
//!
//! One bit per path source. A single machine word keeps "set my bit" and
//! "claim a complete round" atomic, which caps a path at [`MAX_SOURCES`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of sources per path
pub const MAX_SOURCES: usize = 64;

/// Immutable set of source indices
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceMask(u64);

impl SourceMask {
    pub const EMPTY: SourceMask = SourceMask(0);

    #[inline]
    pub fn bit(index: usize) -> Self {
        debug_assert!(index < MAX_SOURCES);
        SourceMask(1u64 << index)
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        self.0 |= Self::bit(index).0;
    }

    #[inline]
    pub fn test(&self, index: usize) -> bool {
        index < MAX_SOURCES && self.0 & (1u64 << index) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// `true` if every bit of `self` is also set in `bits`
    #[inline]
    pub fn covered_by(&self, bits: u64) -> bool {
        bits & self.0 == self.0
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SourceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceMask({:#b})", self.0)
    }
}

/// Concurrently updated set of sources that contributed since the last fire
#[derive(Default)]
pub struct AtomicSourceSet(AtomicU64);

impl AtomicSourceSet {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Set bit `index`, returning the resulting bits
    #[inline]
    pub fn insert(&self, index: usize) -> u64 {
        let bit = SourceMask::bit(index).raw();
        self.0.fetch_or(bit, Ordering::AcqRel) | bit
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Atomically clear the set if it covers `mask`
    ///
    /// Exactly one caller wins each complete round: losers either see an
    /// incomplete set (someone else claimed it) or retry after a concurrent
    /// unrelated bit flip.
    pub fn claim_round(&self, mask: SourceMask) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if !mask.covered_by(current) {
                return false;
            }
            match self
                .0
                .compare_exchange_weak(current, 0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for AtomicSourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicSourceSet({:#b})", self.load())
    }
}
