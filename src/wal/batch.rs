//! Write Batch
//!
//! The logical record appended to the WAL: a group of puts and deletes that
//! become visible together under consecutive sequence numbers.
//!
//! ## Format
//! ```text
//! ┌────────────────┬─────────────┬──────────────────────────────┐
//! │ sequence (8)   │ count (4)   │ record * count               │
//! └────────────────┴─────────────┴──────────────────────────────┘
//!
//! record := 0x01 varstring(key) varstring(value)    (put)
//!         | 0x00 varstring(key)                     (delete)
//! varstring := varint32(len) bytes[len]
//! ```

use bytes::{BufMut, BytesMut};

use crate::coding::{decode_fixed32, decode_fixed64, get_length_prefixed_slice, put_length_prefixed_slice};
use crate::error::{DriftError, Result};
use crate::memtable::{MemTable, SequenceNumber, ValueType};

/// Sequence (8 bytes) plus count (4 bytes)
pub const BATCH_HEADER_SIZE: usize = 12;

/// A single operation decoded from a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    /// Put a key-value pair
    Put { key: &'a [u8], value: &'a [u8] },

    /// Delete a key
    Delete { key: &'a [u8] },
}

impl<'a> Operation<'a> {
    pub fn key(&self) -> &'a [u8] {
        match *self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

/// Ordered group of updates applied atomically
#[derive(Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: BytesMut,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        let mut rep = BytesMut::with_capacity(BATCH_HEADER_SIZE);
        rep.resize(BATCH_HEADER_SIZE, 0);
        Self { rep }
    }

    /// Rebuild a batch from bytes previously returned by [`WriteBatch::contents`]
    pub fn from_contents(contents: &[u8]) -> Result<Self> {
        if contents.len() < BATCH_HEADER_SIZE {
            return Err(DriftError::corruption("malformed WriteBatch (too small)"));
        }
        Ok(Self {
            rep: BytesMut::from(contents),
        })
    }

    /// Queue a put of `key` -> `value`
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.put_u8(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    /// Queue a deletion of `key`
    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.put_u8(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Drop every queued operation
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
    }

    /// Move the operations of `other` after those of `self`
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
    }

    /// Number of queued operations
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..BATCH_HEADER_SIZE])
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..BATCH_HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
    }

    /// Sequence number of the first operation
    pub fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep[..8])
    }

    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[..8].copy_from_slice(&sequence.to_le_bytes());
    }

    /// Encoded size, used to bound group sizes
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Encoded bytes, the payload of one WAL record
    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Decode the queued operations in order
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            input: &self.rep[BATCH_HEADER_SIZE..],
        }
    }

    /// Decode every operation and check the header count
    pub fn validate(&self) -> Result<Vec<Operation<'_>>> {
        let ops = self.iter().collect::<Result<Vec<_>>>()?;
        if ops.len() != self.count() as usize {
            return Err(DriftError::corruption("WriteBatch has wrong count"));
        }
        Ok(ops)
    }

    /// Apply every operation to `memtable`, numbering them from
    /// [`WriteBatch::sequence`]. Returns the number of entries added.
    ///
    /// The batch is fully decoded, and checked against versions already in
    /// `memtable`, before anything is inserted, so a corrupt or replayed
    /// batch leaves the memtable untouched.
    pub fn insert_into(&self, memtable: &MemTable) -> Result<u32> {
        let ops = self.validate()?;

        let versions = ops.iter().enumerate().map(|(i, op)| {
            let value_type = match op {
                Operation::Put { .. } => ValueType::Value,
                Operation::Delete { .. } => ValueType::Deletion,
            };
            (self.sequence() + i as u64, value_type, *op)
        });

        for (sequence, value_type, op) in versions.clone() {
            if memtable.contains(sequence, value_type, op.key()) {
                return Err(DriftError::corruption(format!(
                    "WriteBatch entry @ {} already applied",
                    sequence
                )));
            }
        }

        for (sequence, value_type, op) in versions {
            let value: &[u8] = match op {
                Operation::Put { value, .. } => value,
                Operation::Delete { .. } => &[],
            };
            if !memtable.try_add(sequence, value_type, op.key(), value) {
                return Err(DriftError::corruption(format!(
                    "WriteBatch entry @ {} already applied",
                    sequence
                )));
            }
        }
        Ok(self.count())
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("sequence", &self.sequence())
            .field("count", &self.count())
            .field("size", &self.rep.len())
            .finish()
    }
}

/// Iterator over the operations of a [`WriteBatch`]
///
/// Yields an error for a malformed record and stops afterwards.
pub struct BatchIter<'a> {
    input: &'a [u8],
}

impl<'a> BatchIter<'a> {
    fn decode_next(&mut self) -> Result<Operation<'a>> {
        let input: &'a [u8] = self.input;
        let (&tag, mut rest) = match input.split_first() {
            Some(split) => split,
            None => return Err(DriftError::corruption("empty WriteBatch record")),
        };

        let op = match ValueType::from_u8(tag) {
            Some(ValueType::Value) => {
                let key = get_length_prefixed_slice(&mut rest);
                let value = get_length_prefixed_slice(&mut rest);
                match (key, value) {
                    (Some(key), Some(value)) => Operation::Put { key, value },
                    _ => return Err(DriftError::corruption("bad WriteBatch Put")),
                }
            }
            Some(ValueType::Deletion) => match get_length_prefixed_slice(&mut rest) {
                Some(key) => Operation::Delete { key },
                None => return Err(DriftError::corruption("bad WriteBatch Delete")),
            },
            None => {
                return Err(DriftError::corruption(format!(
                    "unknown WriteBatch tag {}",
                    tag
                )))
            }
        };

        self.input = rest;
        Ok(op)
    }
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Result<Operation<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.input.is_empty() {
            return None;
        }
        let result = self.decode_next();
        if result.is_err() {
            self.input = &[];
        }
        Some(result)
    }
}
