//! MemTable Module
//!
//! In-memory write buffer for recent writes.
//!
//! ## Responsibilities
//! - Fast multi-version reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track arena usage for rotation triggers
//! - Ordered iteration for sorted-table creation
//!
//! ## Layers
//! ```text
//!   MemTable        add / get / iter          (table.rs)
//!      │  internal keys: user_key + tag       (key.rs)
//!      ▼
//!   SkipList        insert / contains / iter  (skiplist.rs)
//!      │  nodes + key bytes
//!      ▼
//!   Arena           allocate / allocate_aligned
//! ```

pub mod key;
pub mod skiplist;
mod table;

pub use key::{
    extract_user_key, parse_internal_key, InternalKey, InternalKeyComparator, LookupKey,
    ParsedInternalKey, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER,
};
pub use skiplist::{SkipList, SkipListIter};
pub use table::{MemTable, MemTableIterator, MemTableKeyComparator};

/// Result of a point lookup that found a version of the key
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}
