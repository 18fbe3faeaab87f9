//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Recovery from a clean log (no corruption)
//! - Recovery from an empty log
//! - Recovery with partial writes (truncated tail)
//! - Recovery with corrupted fragments (CRC mismatch) and bad batches
//! - Paranoid mode failing on the first corruption
//! - Verify mode (stats only, memtable untouched)

use std::fs::{File, OpenOptions};
use std::io::Cursor;
use std::path::PathBuf;

use driftkv::file::LogFile;
use driftkv::memtable::{InternalKeyComparator, LookupKey, MemTable, MemTableEntry};
use driftkv::wal::{LogWriter, RecoveryResult, WalRecovery, WriteBatch, BLOCK_SIZE, HEADER_SIZE};
use driftkv::{Config, DriftError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("000001.log");
    (temp_dir, wal_path)
}

fn new_memtable() -> MemTable {
    MemTable::new(InternalKeyComparator::default())
}

fn put_batch(sequence: u64, key: &[u8], value: &[u8]) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch.put(key, value);
    batch.set_sequence(sequence);
    batch
}

/// Write raw records using LogWriter (produces a well-formed log)
fn write_records(path: &PathBuf, records: &[&[u8]]) {
    let mut writer = LogWriter::new(LogFile::create(path).unwrap());
    for record in records {
        writer.add_record(record).unwrap();
    }
    writer.sync().unwrap();
}

fn write_batches(path: &PathBuf, batches: &[WriteBatch]) {
    let records: Vec<&[u8]> = batches.iter().map(|b| b.contents()).collect();
    write_records(path, &records);
}

fn truncate_by(path: &PathBuf, bytes: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - bytes).unwrap();
}

fn flip_byte(path: &PathBuf, offset: usize) {
    let mut data = std::fs::read(path).unwrap();
    data[offset] ^= 0x80;
    std::fs::write(path, data).unwrap();
}

fn get(memtable: &MemTable, key: &[u8]) -> Option<MemTableEntry> {
    memtable.get(&LookupKey::new(key, u64::MAX >> 8))
}

fn paranoid() -> Config {
    Config::builder().paranoid_checks(true).build()
}

// =============================================================================
// Recover: Clean Log Tests
// =============================================================================

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    assert_eq!(result, RecoveryResult::default());
    assert!(memtable.is_empty());
}

#[test]
fn test_recover_missing_file() {
    let (_temp, wal_path) = setup_temp_wal();
    let memtable = new_memtable();

    let err = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap_err();
    assert!(matches!(err, DriftError::Io(_)));
}

#[test]
fn test_recover_batches() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut first = WriteBatch::new();
    first.put(b"a", b"1");
    first.put(b"b", b"2");
    first.set_sequence(1);
    let second = put_batch(3, b"a", b"3");
    let mut third = WriteBatch::new();
    third.delete(b"b");
    third.set_sequence(4);
    write_batches(&wal_path, &[first, second, third]);

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    assert_eq!(result.records_recovered, 3);
    assert_eq!(result.entries_recovered, 4);
    assert_eq!(result.corruptions, 0);
    assert_eq!(result.bytes_dropped, 0);
    assert_eq!(result.last_sequence, 4);

    assert_eq!(memtable.entry_count(), 4);
    assert_eq!(get(&memtable, b"a"), Some(MemTableEntry::Value(b"3".to_vec())));
    assert_eq!(get(&memtable, b"b"), Some(MemTableEntry::Tombstone));
}

#[test]
fn test_recover_fragmented_batch() {
    let (_temp, wal_path) = setup_temp_wal();
    let large = vec![b'L'; 100_000];
    write_batches(&wal_path, &[put_batch(1, b"big", &large), put_batch(2, b"small", b"s")]);

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    assert_eq!(result.records_recovered, 2);
    assert_eq!(result.last_sequence, 2);
    assert_eq!(get(&memtable, b"big"), Some(MemTableEntry::Value(large)));
}

#[test]
fn test_replay_from_memory() {
    let mut writer = LogWriter::new(Vec::new());
    writer.add_record(put_batch(9, b"k", b"v").contents()).unwrap();

    let memtable = new_memtable();
    let source = Cursor::new(writer.into_inner());
    let result = WalRecovery::replay(source, &memtable, &Config::default()).unwrap();

    assert_eq!(result.records_recovered, 1);
    assert_eq!(result.last_sequence, 9);
    assert_eq!(get(&memtable, b"k"), Some(MemTableEntry::Value(b"v".to_vec())));
}

// =============================================================================
// Recover: Partial Write Tests
// =============================================================================

#[test]
fn test_recover_truncated_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    let large = vec![b'x'; 40_000];
    write_batches(
        &wal_path,
        &[
            put_batch(1, b"k1", b"v1"),
            put_batch(2, b"k2", b"v2"),
            put_batch(3, b"k3", &large),
        ],
    );
    truncate_by(&wal_path, 50);

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    assert_eq!(result.records_recovered, 2);
    assert_eq!(result.last_sequence, 2);
    assert_eq!(result.corruptions, 1);
    assert!(result.bytes_dropped > 0);
    assert_eq!(get(&memtable, b"k2"), Some(MemTableEntry::Value(b"v2".to_vec())));
    assert_eq!(get(&memtable, b"k3"), None);
}

#[test]
fn test_recover_truncated_header() {
    let (_temp, wal_path) = setup_temp_wal();
    write_batches(&wal_path, &[put_batch(1, b"k1", b"v1"), put_batch(2, b"k2", b"v2")]);
    // Leave three bytes of the second header.
    let second_len = (HEADER_SIZE + put_batch(2, b"k2", b"v2").contents().len()) as u64;
    truncate_by(&wal_path, second_len - 3);

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    assert_eq!(result.records_recovered, 1);
    assert_eq!(result.corruptions, 1);
    assert_eq!(result.bytes_dropped, 3);
}

// =============================================================================
// Recover: Corruption Tests
// =============================================================================

#[test]
fn test_recover_skips_corrupted_block() {
    let (_temp, wal_path) = setup_temp_wal();
    let large = vec![b'x'; 40_000];
    write_batches(
        &wal_path,
        &[
            put_batch(1, b"lost", b"1"),
            put_batch(2, b"spans", &large),
            put_batch(3, b"kept", b"3"),
        ],
    );
    flip_byte(&wal_path, HEADER_SIZE + 12);

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    // Block 0 is dropped; the orphaned tail of "spans" is dropped too.
    assert_eq!(result.records_recovered, 1);
    assert_eq!(result.corruptions, 2);
    assert!(result.bytes_dropped >= BLOCK_SIZE as u64);
    assert_eq!(result.last_sequence, 3);
    assert_eq!(get(&memtable, b"lost"), None);
    assert_eq!(get(&memtable, b"spans"), None);
    assert_eq!(get(&memtable, b"kept"), Some(MemTableEntry::Value(b"3".to_vec())));
}

#[test]
fn test_recover_without_checksums_accepts_damage() {
    let (_temp, wal_path) = setup_temp_wal();
    write_batches(&wal_path, &[put_batch(1, b"k", b"value")]);
    // Last byte of the record is the last byte of the value.
    let len = std::fs::metadata(&wal_path).unwrap().len() as usize;
    flip_byte(&wal_path, len - 1);

    let config = Config::builder().verify_checksums(false).build();
    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &config).unwrap();

    assert_eq!(result.records_recovered, 1);
    assert_eq!(result.corruptions, 0);
    let mut damaged = b"value".to_vec();
    damaged[4] ^= 0x80;
    assert_eq!(get(&memtable, b"k"), Some(MemTableEntry::Value(damaged)));
}

#[test]
fn test_recover_skips_short_record() {
    let (_temp, wal_path) = setup_temp_wal();
    let valid = put_batch(1, b"k", b"v");
    write_records(&wal_path, &[b"tiny", valid.contents()]);

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    assert_eq!(result.records_recovered, 1);
    assert_eq!(result.corruptions, 1);
    assert_eq!(result.bytes_dropped, 4);
    assert_eq!(get(&memtable, b"k"), Some(MemTableEntry::Value(b"v".to_vec())));
}

#[test]
fn test_recover_skips_malformed_batch() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut bad = put_batch(1, b"bad", b"1").contents().to_vec();
    bad[8..12].copy_from_slice(&5u32.to_le_bytes());
    let good = put_batch(2, b"good", b"2");
    write_records(&wal_path, &[&bad, good.contents()]);

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    assert_eq!(result.records_recovered, 1);
    assert_eq!(result.corruptions, 1);
    assert_eq!(result.bytes_dropped, bad.len() as u64);
    assert_eq!(get(&memtable, b"bad"), None);
    assert_eq!(get(&memtable, b"good"), Some(MemTableEntry::Value(b"2".to_vec())));
}

#[test]
fn test_recover_skips_repeated_sequence() {
    // A retried write can leave the same batch in the log twice.
    let mut writer = LogWriter::new(Vec::new());
    writer.add_record(put_batch(1, b"k", b"v").contents()).unwrap();
    writer.add_record(put_batch(1, b"k", b"v").contents()).unwrap();
    writer.add_record(put_batch(2, b"next", b"n").contents()).unwrap();
    let log = writer.into_inner();

    let memtable = new_memtable();
    let result = WalRecovery::replay(Cursor::new(log.clone()), &memtable, &Config::default()).unwrap();

    assert_eq!(result.records_recovered, 2);
    assert_eq!(result.corruptions, 1);
    assert_eq!(result.last_sequence, 2);
    assert_eq!(memtable.entry_count(), 2);
    assert_eq!(get(&memtable, b"k"), Some(MemTableEntry::Value(b"v".to_vec())));
    assert_eq!(get(&memtable, b"next"), Some(MemTableEntry::Value(b"n".to_vec())));

    let err = WalRecovery::replay(Cursor::new(log), &new_memtable(), &paranoid()).unwrap_err();
    assert!(err.is_corruption());
}

// =============================================================================
// Paranoid Mode Tests
// =============================================================================

#[test]
fn test_paranoid_fails_on_checksum_mismatch() {
    let (_temp, wal_path) = setup_temp_wal();
    write_batches(&wal_path, &[put_batch(1, b"a", b"1"), put_batch(2, b"b", b"2")]);
    flip_byte(&wal_path, HEADER_SIZE + 12);

    let memtable = new_memtable();
    let err = WalRecovery::recover(&wal_path, &memtable, &paranoid()).unwrap_err();
    assert!(err.is_corruption());
    assert!(err.to_string().contains("checksum mismatch"));
}

#[test]
fn test_paranoid_fails_on_truncated_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    write_batches(&wal_path, &[put_batch(1, b"a", b"1"), put_batch(2, b"b", b"2")]);
    truncate_by(&wal_path, 2);

    let memtable = new_memtable();
    let err = WalRecovery::recover(&wal_path, &memtable, &paranoid()).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_paranoid_fails_on_malformed_batch() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut bad = put_batch(1, b"bad", b"1").contents().to_vec();
    bad.push(9);
    bad[8..12].copy_from_slice(&2u32.to_le_bytes());
    write_records(&wal_path, &[&bad]);

    let memtable = new_memtable();
    let err = WalRecovery::recover(&wal_path, &memtable, &paranoid()).unwrap_err();
    assert!(err.to_string().contains("unknown WriteBatch tag 9"));
    assert!(memtable.is_empty());
}

#[test]
fn test_paranoid_accepts_clean_log() {
    let (_temp, wal_path) = setup_temp_wal();
    write_batches(&wal_path, &[put_batch(1, b"a", b"1"), put_batch(2, b"b", b"2")]);

    let memtable = new_memtable();
    let result = WalRecovery::recover(&wal_path, &memtable, &paranoid()).unwrap();
    assert_eq!(result.records_recovered, 2);
}

// =============================================================================
// Verify Mode Tests
// =============================================================================

#[test]
fn test_verify_matches_recover() {
    let (_temp, wal_path) = setup_temp_wal();
    let large = vec![b'x'; 40_000];
    write_batches(
        &wal_path,
        &[put_batch(1, b"a", b"1"), put_batch(2, b"b", &large), put_batch(3, b"c", b"3")],
    );
    truncate_by(&wal_path, 10);

    let verified = WalRecovery::verify(&wal_path, &Config::default()).unwrap();
    let memtable = new_memtable();
    let recovered = WalRecovery::recover(&wal_path, &memtable, &Config::default()).unwrap();

    assert_eq!(verified, recovered);
    assert_eq!(verified.records_recovered, 2);
    assert_eq!(verified.corruptions, 1);
}

#[test]
fn test_verify_reports_bad_batch() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut bad = put_batch(1, b"bad", b"1").contents().to_vec();
    bad[8..12].copy_from_slice(&0u32.to_le_bytes());
    write_records(&wal_path, &[&bad]);

    let result = WalRecovery::verify(&wal_path, &Config::default()).unwrap();
    assert_eq!(result.records_recovered, 0);
    assert_eq!(result.corruptions, 1);
}

// =============================================================================
// Result Tests
// =============================================================================

#[test]
fn test_merge_results() {
    let mut total = RecoveryResult {
        records_recovered: 2,
        entries_recovered: 3,
        corruptions: 1,
        bytes_dropped: 10,
        last_sequence: 7,
    };
    total.merge(&RecoveryResult {
        records_recovered: 1,
        entries_recovered: 1,
        corruptions: 0,
        bytes_dropped: 0,
        last_sequence: 5,
    });

    assert_eq!(total.records_recovered, 3);
    assert_eq!(total.entries_recovered, 4);
    assert_eq!(total.corruptions, 1);
    assert_eq!(total.bytes_dropped, 10);
    assert_eq!(total.last_sequence, 7);
}
