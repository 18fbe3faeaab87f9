//! WAL Recovery
//!
//! Handles crash recovery by replaying a log into a memtable.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{DriftError, Result};
use crate::file::SequentialFile;
use crate::memtable::{MemTable, SequenceNumber};

use super::batch::{WriteBatch, BATCH_HEADER_SIZE};
use super::reader::LogReader;

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of log records (write batches) successfully applied
    pub records_recovered: u64,

    /// Number of memtable entries those batches produced
    pub entries_recovered: u64,

    /// Number of corrupted regions or batches skipped
    pub corruptions: u64,

    /// Bytes dropped because of corruption
    pub bytes_dropped: u64,

    /// Highest sequence number recovered (0 if none)
    pub last_sequence: SequenceNumber,
}

impl RecoveryResult {
    /// Fold the result of another log into this one
    pub fn merge(&mut self, other: &RecoveryResult) {
        self.records_recovered += other.records_recovered;
        self.entries_recovered += other.entries_recovered;
        self.corruptions += other.corruptions;
        self.bytes_dropped += other.bytes_dropped;
        self.last_sequence = self.last_sequence.max(other.last_sequence);
    }
}

/// Drops reported by the log reader
#[derive(Default)]
struct DropLog {
    corruptions: u64,
    bytes: u64,
    first: Option<String>,
}

impl WalRecovery {
    /// Replay the log at `path` into `memtable`
    ///
    /// This will:
    /// 1. Read every intact record
    /// 2. Report and skip corrupted regions (or fail, with `paranoid_checks`)
    /// 3. Decode each record as a write batch and insert it
    /// 4. Track the highest sequence number seen
    pub fn recover(path: &Path, memtable: &MemTable, config: &Config) -> Result<RecoveryResult> {
        let file = BufReader::new(File::open(path)?);
        let result = Self::replay(file, memtable, config)?;
        info!(
            path = %path.display(),
            records = result.records_recovered,
            entries = result.entries_recovered,
            corruptions = result.corruptions,
            last_sequence = result.last_sequence,
            "replayed write-ahead log"
        );
        Ok(result)
    }

    /// Replay any log source into `memtable`
    pub fn replay<F: SequentialFile>(
        source: F,
        memtable: &MemTable,
        config: &Config,
    ) -> Result<RecoveryResult> {
        Self::scan(source, config, |batch| batch.insert_into(memtable))
    }

    /// Verify integrity of a log without applying it
    pub fn verify(path: &Path, config: &Config) -> Result<RecoveryResult> {
        let file = BufReader::new(File::open(path)?);
        Self::scan(file, config, |batch| Ok(batch.validate()?.len() as u32))
    }

    fn scan<F, A>(source: F, config: &Config, mut apply: A) -> Result<RecoveryResult>
    where
        F: SequentialFile,
        A: FnMut(&WriteBatch) -> Result<u32>,
    {
        let drops = Arc::new(Mutex::new(DropLog::default()));
        let reporter = {
            let drops = Arc::clone(&drops);
            move |bytes: usize, reason: &DriftError| {
                let mut drops = drops.lock();
                drops.corruptions += 1;
                drops.bytes += bytes as u64;
                if drops.first.is_none() {
                    drops.first = Some(match reason {
                        DriftError::Corruption(msg) => msg.clone(),
                        other => other.to_string(),
                    });
                }
            }
        };

        let mut reader = LogReader::new(source, Some(Box::new(reporter)), config.verify_checksums, 0);
        let mut result = RecoveryResult::default();

        while let Some(record) = reader.read_record() {
            if config.paranoid_checks {
                if let Some(reason) = drops.lock().first.take() {
                    return Err(DriftError::Corruption(reason));
                }
            }

            if record.len() < BATCH_HEADER_SIZE {
                warn!(bytes = record.len(), "log record too small for a write batch");
                if config.paranoid_checks {
                    return Err(DriftError::corruption("log record too small"));
                }
                result.corruptions += 1;
                result.bytes_dropped += record.len() as u64;
                continue;
            }

            let batch = WriteBatch::from_contents(&record)?;
            match apply(&batch) {
                Ok(entries) => {
                    result.records_recovered += 1;
                    result.entries_recovered += entries as u64;
                    if entries > 0 {
                        let last = batch.sequence() + entries as u64 - 1;
                        result.last_sequence = result.last_sequence.max(last);
                    }
                    debug!(
                        sequence = batch.sequence(),
                        entries,
                        offset = reader.last_record_offset(),
                        "applied log record"
                    );
                }
                Err(e) if e.is_corruption() && !config.paranoid_checks => {
                    warn!(error = %e, offset = reader.last_record_offset(), "skipping bad write batch");
                    result.corruptions += 1;
                    result.bytes_dropped += record.len() as u64;
                }
                Err(e) => return Err(e),
            }
        }

        let drops = drops.lock();
        if config.paranoid_checks {
            if let Some(reason) = drops.first.clone() {
                return Err(DriftError::Corruption(reason));
            }
        }
        result.corruptions += drops.corruptions;
        result.bytes_dropped += drops.bytes;
        Ok(result)
    }
}
