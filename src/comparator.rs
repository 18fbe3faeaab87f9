//! Key ordering
//!
//! Total orders over opaque byte keys used by the skip list and the memtable.

use std::cmp::Ordering;

/// A total order over byte strings
///
/// Implementations must be consistent: the skip list relies on the order never
/// changing for the lifetime of the structure that uses it.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Stable name of the ordering, persisted alongside data it sorted
    fn name(&self) -> &'static str;
}

/// Lexicographic byte order
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &'static str {
        "driftkv.BytewiseComparator"
    }
}
