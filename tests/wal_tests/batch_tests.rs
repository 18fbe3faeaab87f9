//! Tests for WriteBatch
//!
//! These tests verify:
//! - Encoded layout (header, put and delete records)
//! - Sequence numbering when applied to a memtable
//! - Decoding errors for malformed batches
//! - Appending and clearing

use driftkv::memtable::{InternalKeyComparator, MemTable, ValueType};
use driftkv::wal::{Operation, WriteBatch, BATCH_HEADER_SIZE};

// =============================================================================
// Helper Functions
// =============================================================================

/// Apply `batch` to a fresh memtable and render its contents in order
fn print_contents(batch: &WriteBatch) -> String {
    let memtable = MemTable::new(InternalKeyComparator::default());
    let mut out = String::new();
    let count = match batch.insert_into(&memtable) {
        Ok(count) => count as usize,
        Err(_) => {
            out.push_str("ParseError()");
            0
        }
    };

    let mut iter = memtable.iter();
    iter.seek_to_first();
    let mut seen = 0;
    while iter.valid() {
        let parsed = iter.parsed_key().unwrap();
        let key = String::from_utf8_lossy(parsed.user_key);
        match parsed.value_type {
            ValueType::Value => out.push_str(&format!(
                "Put({}, {})",
                key,
                String::from_utf8_lossy(iter.value())
            )),
            ValueType::Deletion => out.push_str(&format!("Delete({})", key)),
        }
        out.push_str(&format!("@{}", parsed.sequence));
        seen += 1;
        iter.next();
    }
    assert_eq!(seen, count);
    out
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_empty_batch() {
    let batch = WriteBatch::new();
    assert_eq!(batch.count(), 0);
    assert_eq!(batch.sequence(), 0);
    assert!(batch.is_empty());
    assert_eq!(batch.contents(), &[0u8; BATCH_HEADER_SIZE]);
    assert_eq!(print_contents(&batch), "");
}

#[test]
fn test_put_layout() {
    let mut batch = WriteBatch::new();
    batch.put(b"k", b"v");

    let mut expected = vec![0u8; 8];
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&[0x01, 1, b'k', 1, b'v']);
    assert_eq!(batch.contents(), expected.as_slice());
}

#[test]
fn test_delete_layout() {
    let mut batch = WriteBatch::new();
    batch.set_sequence(0x0102);
    batch.delete(b"gone");

    let mut expected = 0x0102u64.to_le_bytes().to_vec();
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&[0x00, 4, b'g', b'o', b'n', b'e']);
    assert_eq!(batch.contents(), expected.as_slice());
}

#[test]
fn test_sequence_round_trip() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.set_sequence(987_654_321);
    assert_eq!(batch.sequence(), 987_654_321);
    assert_eq!(batch.count(), 1);
}

#[test]
fn test_approximate_size_grows() {
    let mut batch = WriteBatch::new();
    let empty = batch.approximate_size();
    assert_eq!(empty, BATCH_HEADER_SIZE);

    batch.put(b"foo", b"bar");
    let one = batch.approximate_size();
    assert!(one > empty);

    batch.delete(b"foo");
    assert!(batch.approximate_size() > one);
}

// =============================================================================
// Apply Tests
// =============================================================================

#[test]
fn test_multiple_operations() {
    let mut batch = WriteBatch::new();
    batch.put(b"foo", b"bar");
    batch.delete(b"box");
    batch.put(b"baz", b"boo");
    batch.set_sequence(100);

    assert_eq!(batch.sequence(), 100);
    assert_eq!(batch.count(), 3);
    assert_eq!(
        print_contents(&batch),
        "Put(baz, boo)@102Delete(box)@101Put(foo, bar)@100"
    );
}

#[test]
fn test_iter_yields_operations_in_order() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.delete(b"b");
    batch.put(b"", b"");

    let ops: Vec<Operation<'_>> = batch.iter().map(|op| op.unwrap()).collect();
    assert_eq!(
        ops,
        vec![
            Operation::Put { key: b"a", value: b"1" },
            Operation::Delete { key: b"b" },
            Operation::Put { key: b"", value: b"" },
        ]
    );
    assert_eq!(ops[1].key(), b"b");
}

#[test]
fn test_same_key_in_one_batch() {
    let mut batch = WriteBatch::new();
    batch.put(b"k", b"old");
    batch.put(b"k", b"new");
    batch.set_sequence(10);

    assert_eq!(print_contents(&batch), "Put(k, new)@11Put(k, old)@10");
}

#[test]
fn test_from_contents_round_trip() {
    let mut batch = WriteBatch::new();
    batch.put(b"x", b"y");
    batch.set_sequence(7);

    let rebuilt = WriteBatch::from_contents(batch.contents()).unwrap();
    assert_eq!(rebuilt, batch);
    assert_eq!(print_contents(&rebuilt), "Put(x, y)@7");
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_from_contents_too_small() {
    let err = WriteBatch::from_contents(&[0u8; BATCH_HEADER_SIZE - 1]).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_truncated_record() {
    let mut batch = WriteBatch::new();
    batch.put(b"foo", b"bar");
    batch.delete(b"box");
    batch.set_sequence(200);

    let contents = batch.contents();
    let truncated = WriteBatch::from_contents(&contents[..contents.len() - 1]).unwrap();

    // Nothing is applied from a batch that fails to decode.
    assert_eq!(print_contents(&truncated), "ParseError()");

    let memtable = MemTable::new(InternalKeyComparator::default());
    let err = truncated.insert_into(&memtable).unwrap_err();
    assert!(err.to_string().contains("bad WriteBatch Delete"));
    assert!(memtable.is_empty());
}

#[test]
fn test_truncated_put_value() {
    let mut batch = WriteBatch::new();
    batch.put(b"key", b"value");
    let contents = batch.contents();
    let truncated = WriteBatch::from_contents(&contents[..contents.len() - 2]).unwrap();

    let errors: Vec<_> = truncated.iter().filter_map(|op| op.err()).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("bad WriteBatch Put"));
}

#[test]
fn test_unknown_tag() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    let mut contents = batch.contents().to_vec();
    contents[8..12].copy_from_slice(&2u32.to_le_bytes());
    contents.push(7);

    let bad = WriteBatch::from_contents(&contents).unwrap();
    let results: Vec<_> = bad.iter().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    let err = results[1].as_ref().unwrap_err();
    assert!(err.to_string().contains("unknown WriteBatch tag 7"));
}

#[test]
fn test_wrong_count() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put(b"b", b"2");
    let mut contents = batch.contents().to_vec();
    contents[8..12].copy_from_slice(&3u32.to_le_bytes());

    let bad = WriteBatch::from_contents(&contents).unwrap();
    let memtable = MemTable::new(InternalKeyComparator::default());
    let err = bad.insert_into(&memtable).unwrap_err();
    assert!(err.to_string().contains("wrong count"));
    assert!(memtable.is_empty());
}

#[test]
fn test_insert_twice_is_corruption() {
    let mut batch = WriteBatch::new();
    batch.put(b"foo", b"bar");
    batch.delete(b"box");
    batch.set_sequence(100);

    let memtable = MemTable::new(InternalKeyComparator::default());
    assert_eq!(batch.insert_into(&memtable).unwrap(), 2);

    let err = batch.insert_into(&memtable).unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(memtable.entry_count(), 2);
}

#[test]
fn test_validate_checks_count() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.delete(b"b");
    assert_eq!(batch.validate().unwrap().len(), 2);

    let mut contents = batch.contents().to_vec();
    contents[8..12].copy_from_slice(&3u32.to_le_bytes());
    let bad = WriteBatch::from_contents(&contents).unwrap();
    assert!(bad.validate().unwrap_err().is_corruption());
}

// =============================================================================
// Append / Clear Tests
// =============================================================================

#[test]
fn test_append() {
    let mut b1 = WriteBatch::new();
    let mut b2 = WriteBatch::new();
    b1.set_sequence(200);
    b2.set_sequence(300);

    b1.append(&b2);
    assert_eq!(print_contents(&b1), "");

    b2.put(b"a", b"va");
    b1.append(&b2);
    assert_eq!(print_contents(&b1), "Put(a, va)@200");

    b2.clear();
    b2.put(b"b", b"vb");
    b1.append(&b2);
    assert_eq!(print_contents(&b1), "Put(a, va)@200Put(b, vb)@201");

    b2.delete(b"foo");
    b1.append(&b2);
    assert_eq!(
        print_contents(&b1),
        "Put(a, va)@200Put(b, vb)@202Put(b, vb)@201Delete(foo)@203"
    );
    assert_eq!(b1.count(), 4);
}

#[test]
fn test_clear() {
    let mut batch = WriteBatch::new();
    batch.set_sequence(5);
    batch.put(b"a", b"1");
    batch.clear();

    assert!(batch.is_empty());
    assert_eq!(batch.sequence(), 0);
    assert_eq!(batch.approximate_size(), BATCH_HEADER_SIZE);
}
