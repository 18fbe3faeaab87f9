//! MemTable implementation
//!
//! Skip-list-based memtable. Values are folded into the skip list key, so a
//! single arena allocation holds the whole entry, encoded in place.

use std::cmp::Ordering;

use crate::arena::{Arena, DEFAULT_BLOCK_SIZE};
use crate::coding::{
    decode_fixed64, encode_varint32, get_length_prefixed_slice, put_length_prefixed_slice,
    put_varint32, varint_length,
};
use crate::comparator::Comparator;

use super::key::{
    extract_user_key, pack_sequence_and_type, parse_internal_key, InternalKeyComparator,
    LookupKey, ParsedInternalKey, SequenceNumber, ValueType, TAG_SIZE,
};
use super::skiplist::{SkipList, SkipListIter};
use super::MemTableEntry;

/// Orders encoded memtable entries by their length-prefixed internal key
#[derive(Debug, Clone)]
pub struct MemTableKeyComparator {
    comparator: InternalKeyComparator,
}

impl Comparator for MemTableKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.comparator
            .compare(length_prefixed(a), length_prefixed(b))
    }

    fn name(&self) -> &'static str {
        "driftkv.MemTableKeyComparator"
    }
}

/// Internal key at the front of an encoded entry or seek target
fn length_prefixed(data: &[u8]) -> &[u8] {
    let mut input = data;
    match get_length_prefixed_slice(&mut input) {
        Some(slice) => slice,
        None => panic!("malformed memtable entry of {} bytes", data.len()),
    }
}

/// Split an encoded entry into (internal key, value)
fn decode_entry(entry: &[u8]) -> (&[u8], &[u8]) {
    let mut input = entry;
    match (
        get_length_prefixed_slice(&mut input),
        get_length_prefixed_slice(&mut input),
    ) {
        (Some(internal_key), Some(value)) => (internal_key, value),
        _ => panic!("malformed memtable entry of {} bytes", entry.len()),
    }
}

/// In-memory table of recent writes
///
/// Entry encoding (one skip list key per entry):
/// ```text
/// varint32(ikey_len) | user_key | fixed64(seq << 8 | type) | varint32(vlen) | value
/// ```
///
/// ## Concurrency:
/// - `add`: one writer at a time (enforced inside the skip list)
/// - `get`/`iter`: lock-free, safe alongside the writer
/// - Shared as `Arc<MemTable>`; dropped when the last holder lets go
pub struct MemTable {
    comparator: InternalKeyComparator,
    table: SkipList<MemTableKeyComparator>,
}

impl MemTable {
    /// Create an empty memtable with default-sized arena blocks
    pub fn new(comparator: InternalKeyComparator) -> Self {
        Self::with_block_size(comparator, DEFAULT_BLOCK_SIZE)
    }

    /// Create an empty memtable whose arena uses `block_size` blocks
    pub fn with_block_size(comparator: InternalKeyComparator, block_size: usize) -> Self {
        let table = SkipList::with_arena(
            MemTableKeyComparator {
                comparator: comparator.clone(),
            },
            Arena::with_block_size(block_size),
        );
        Self { comparator, table }
    }

    /// Add a version of `key`. `value` is ignored by readers for deletions.
    ///
    /// # Panics
    /// Panics if the same (key, sequence, type) was already added.
    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let added = self.try_add(sequence, value_type, key, value);
        assert!(added, "duplicate key inserted into memtable");
    }

    /// Like [`MemTable::add`], but returns `false` instead of panicking when
    /// the same (key, sequence, type) is already present.
    pub fn try_add(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        key: &[u8],
        value: &[u8],
    ) -> bool {
        let internal_key_len = key.len() + TAG_SIZE;
        let encoded_len = varint_length(internal_key_len as u64)
            + internal_key_len
            + varint_length(value.len() as u64)
            + value.len();
        let tag = pack_sequence_and_type(sequence, value_type);

        self.table.insert_with(encoded_len, |buf| {
            let mut pos = encode_varint32(buf, internal_key_len as u32);
            buf[pos..pos + key.len()].copy_from_slice(key);
            pos += key.len();
            buf[pos..pos + TAG_SIZE].copy_from_slice(&tag.to_le_bytes());
            pos += TAG_SIZE;
            pos += encode_varint32(&mut buf[pos..], value.len() as u32);
            buf[pos..].copy_from_slice(value);
        })
    }

    /// True if this exact (key, sequence, type) version was added
    pub fn contains(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8]) -> bool {
        let internal_key_len = key.len() + TAG_SIZE;
        let mut target = Vec::with_capacity(varint_length(internal_key_len as u64) + internal_key_len);
        put_varint32(&mut target, internal_key_len as u32);
        ParsedInternalKey::new(key, sequence, value_type).encode_into(&mut target);
        self.table.contains(&target)
    }

    /// Look up the newest version of a key visible at the lookup sequence
    ///
    /// Returns:
    /// - `Some(MemTableEntry::Value(v))` if the newest version is a value
    /// - `Some(MemTableEntry::Tombstone)` if the newest version is a deletion
    /// - `None` if this memtable has no version of the key
    pub fn get(&self, key: &LookupKey) -> Option<MemTableEntry> {
        let mut iter = self.table.iter();
        iter.seek(key.memtable_key());
        if !iter.valid() {
            return None;
        }

        // The seek already skipped every version newer than the lookup
        // sequence, so only the user key needs checking.
        let (internal_key, value) = decode_entry(iter.key());
        let user_comparator = self.comparator.user_comparator();
        if user_comparator.compare(extract_user_key(internal_key), key.user_key()) != Ordering::Equal
        {
            return None;
        }

        let tag = decode_fixed64(&internal_key[internal_key.len() - TAG_SIZE..]);
        match ValueType::from_u8((tag & 0xff) as u8)? {
            ValueType::Value => Some(MemTableEntry::Value(value.to_vec())),
            ValueType::Deletion => Some(MemTableEntry::Tombstone),
        }
    }

    /// Approximate bytes in use, taken from the arena
    pub fn approximate_memory_usage(&self) -> usize {
        self.table.memory_usage()
    }

    /// Check if the memtable has reached `size_limit` and should be rotated
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.approximate_memory_usage() >= size_limit
    }

    /// Number of entries (versions, not distinct keys)
    pub fn entry_count(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.comparator
    }

    /// Cursor over all entries in internal key order
    pub fn iter(&self) -> MemTableIterator<'_> {
        MemTableIterator {
            iter: self.table.iter(),
            scratch: Vec::new(),
        }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new(InternalKeyComparator::default())
    }
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("entries", &self.entry_count())
            .field("memory_usage", &self.approximate_memory_usage())
            .finish()
    }
}

/// Cursor over MemTable entries
///
/// This is the surface a sorted-table builder drains on flush:
/// `seek_to_first`, then `key`/`value` and `next` while `valid`.
pub struct MemTableIterator<'a> {
    iter: SkipListIter<'a, MemTableKeyComparator>,
    /// Holds the length-prefixed seek target
    scratch: Vec<u8>,
}

impl<'a> MemTableIterator<'a> {
    pub fn valid(&self) -> bool {
        self.iter.valid()
    }

    /// Position at the first entry with internal key >= `internal_key`
    pub fn seek(&mut self, internal_key: &[u8]) {
        self.scratch.clear();
        put_length_prefixed_slice(&mut self.scratch, internal_key);
        self.iter.seek(&self.scratch);
    }

    pub fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
    }

    pub fn seek_to_last(&mut self) {
        self.iter.seek_to_last();
    }

    pub fn next(&mut self) {
        self.iter.next();
    }

    pub fn prev(&mut self) {
        self.iter.prev();
    }

    /// Internal key of the current entry
    pub fn key(&self) -> &'a [u8] {
        length_prefixed(self.iter.key())
    }

    /// Value of the current entry (empty for deletions)
    pub fn value(&self) -> &'a [u8] {
        decode_entry(self.iter.key()).1
    }

    pub fn user_key(&self) -> &'a [u8] {
        extract_user_key(self.key())
    }

    /// Decoded internal key of the current entry
    pub fn parsed_key(&self) -> Option<ParsedInternalKey<'a>> {
        parse_internal_key(self.key())
    }
}
