//! Internal Keys
//!
//! Every user key stored in the memtable carries an 8-byte tag so that several
//! versions of the same key can coexist in a structure without updates.
//!
//! ## Internal Key Format
//! ```text
//! ┌──────────────────┬──────────────────────────────────────┐
//! │ user_key (n)     │ fixed64( sequence << 8 | value_type )│
//! └──────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Ordering: user key ascending, then tag descending, so the newest version
//! of a key is met first by a forward seek.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::coding::{decode_fixed64, encode_varint32, put_fixed64, varint_length};
use crate::comparator::{BytewiseComparator, Comparator};

/// Monotonic per-write sequence number (56 bits used)
pub type SequenceNumber = u64;

/// Largest representable sequence number; low 8 tag bits hold the type
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Size of the tag appended to every user key
pub const TAG_SIZE: usize = 8;

/// Operation recorded for a key version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0x0,
    Value = 0x1,
}

/// Type used when building seek targets. Tags sort descending, so the highest
/// type value positions a seek before every entry at the same sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(ValueType::Deletion),
            0x1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

/// Combine a sequence number and a type into the on-disk tag
pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    assert!(sequence <= MAX_SEQUENCE_NUMBER, "sequence number overflow");
    (sequence << 8) | value_type as u64
}

/// Borrowed, decoded view of an internal key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn new(user_key: &'a [u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        Self {
            user_key,
            sequence,
            value_type,
        }
    }

    /// Length of the encoded internal key
    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + TAG_SIZE
    }

    /// Append the encoded internal key to `dst`
    pub fn encode_into(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(self.user_key);
        put_fixed64(dst, pack_sequence_and_type(self.sequence, self.value_type));
    }
}

impl fmt::Display for ParsedInternalKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' @ {} : {:?}",
            String::from_utf8_lossy(self.user_key),
            self.sequence,
            self.value_type
        )
    }
}

/// Decode an internal key; `None` if it is too short or has an unknown type
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if internal_key.len() < TAG_SIZE {
        return None;
    }
    let split = internal_key.len() - TAG_SIZE;
    let tag = decode_fixed64(&internal_key[split..]);
    let value_type = ValueType::from_u8((tag & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &internal_key[..split],
        sequence: tag >> 8,
        value_type,
    })
}

/// User key portion of an internal key.
///
/// # Panics
/// Panics if `internal_key` is shorter than the tag.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    assert!(internal_key.len() >= TAG_SIZE, "internal key shorter than its tag");
    &internal_key[..internal_key.len() - TAG_SIZE]
}

/// Owned encoded internal key
#[derive(Clone, PartialEq, Eq, Default)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + TAG_SIZE);
        ParsedInternalKey::new(user_key, sequence, value_type).encode_into(&mut rep);
        Self { rep }
    }

    /// Wrap already-encoded bytes without validation
    pub fn from_encoded(rep: Vec<u8>) -> Self {
        Self { rep }
    }

    pub fn encode(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn parse(&self) -> Option<ParsedInternalKey<'_>> {
        parse_internal_key(&self.rep)
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parse() {
            Some(parsed) => write!(f, "{}", parsed),
            None => write!(f, "(bad){:?}", self.rep),
        }
    }
}

/// Orders internal keys: user key by the user comparator, then tag descending
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        Self { user_comparator }
    }

    pub fn user_comparator(&self) -> &dyn Comparator {
        self.user_comparator.as_ref()
    }
}

impl Default for InternalKeyComparator {
    fn default() -> Self {
        Self::new(Arc::new(BytewiseComparator))
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user_comparator", &self.user_comparator.name())
            .finish()
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
            .then_with(|| {
                let a_tag = decode_fixed64(&a[a.len() - TAG_SIZE..]);
                let b_tag = decode_fixed64(&b[b.len() - TAG_SIZE..]);
                b_tag.cmp(&a_tag)
            })
    }

    fn name(&self) -> &'static str {
        "driftkv.InternalKeyComparator"
    }
}

/// Seek target for a point lookup of `user_key` as of `sequence`
///
/// ```text
/// ┌───────────────────┬──────────┬─────────────────────┐
/// │ varint32(klen + 8)│ user_key │ fixed64(seq << 8|1) │
/// └───────────────────┴──────────┴─────────────────────┘
/// ^ memtable_key      ^ internal_key                  ^
///                     ^ user_key ^
/// ```
pub struct LookupKey {
    data: Vec<u8>,
    /// Start of the internal key within `data`
    kstart: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let internal_len = user_key.len() + TAG_SIZE;
        let mut data = vec![0u8; varint_length(internal_len as u64)];
        let kstart = encode_varint32(&mut data, internal_len as u32);
        data.reserve(internal_len);
        ParsedInternalKey::new(user_key, sequence, VALUE_TYPE_FOR_SEEK).encode_into(&mut data);
        Self { data, kstart }
    }

    /// Key suitable for a memtable seek (length-prefixed internal key)
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.kstart..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.data[self.kstart..self.data.len() - TAG_SIZE]
    }
}
