//! Engine Module
//!
//! Write path coordinator over the WAL and the memtables.
//!
//! ## Responsibilities
//! - Assign sequence numbers to write batches
//! - Log every batch before it becomes visible in the memtable
//! - Rotate the memtable (and its log) once it reaches the size limit
//! - Recover memtable contents from logs on startup
//! - Hand frozen memtables to an external flush target and retire their logs

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::config::{Config, WalSyncStrategy};
use crate::error::{DriftError, Result};
use crate::file::{LogFile, WritableFile};
use crate::memtable::{InternalKeyComparator, LookupKey, MemTable, MemTableEntry, SequenceNumber};
use crate::wal::{LogWriter, RecoveryResult, WalRecovery, WriteBatch};

/// A memtable that no longer accepts writes, with the logs that cover it
///
/// The logs may be deleted (see [`Engine::retire`]) once the memtable has been
/// durably written elsewhere.
#[derive(Debug, Clone)]
pub struct FrozenMemTable {
    pub memtable: Arc<MemTable>,
    pub log_numbers: Vec<u64>,
}

/// Creates the sink backing a new log file at the given path
pub type LogSinkFactory = Box<dyn Fn(&Path) -> Result<Box<dyn WritableFile>> + Send + Sync>;

/// State owned by the single writer
struct WriterState {
    log: LogWriter<Box<dyn WritableFile>>,
    /// Number of the log currently appended to
    log_number: u64,
    next_log_number: u64,
    /// Logs whose records live in the active memtable
    mem_logs: Vec<u64>,
    /// Writes appended since the last sync
    unsynced: usize,
    /// First log failure. Once set, the active log may hold a partial record,
    /// so every later write is refused until the engine is reopened.
    failed: Option<String>,
}

/// The write path engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (write/put/delete/rotate): Serialized by the `writer` mutex
///   - Must acquire: writer → WAL append → memtable insert → sequence publish
///
/// - **Reads** (get): No writer lock
///   - Clone the active `Arc<MemTable>` under a short read lock
///   - Read the sequence with `Acquire`, so every entry up to it is visible
pub struct Engine {
    /// Engine configuration
    config: Config,

    comparator: InternalKeyComparator,

    /// Log writer and numbering (exclusive access needed)
    writer: Mutex<WriterState>,

    create_log: LogSinkFactory,

    /// Active memtable, replaced on rotation
    mem: RwLock<Arc<MemTable>>,

    /// Frozen memtables awaiting flush, oldest first
    imm: RwLock<VecDeque<FrozenMemTable>>,

    /// Highest sequence number visible to readers
    last_sequence: AtomicU64,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOG_SUFFIX: &'static str = ".log";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Replay every existing log, oldest first, into a fresh memtable
    /// 3. Start a new log for incoming writes
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_log_sink(
            config,
            Box::new(|path: &Path| -> Result<Box<dyn WritableFile>> {
                Ok(Box::new(LogFile::create(path)?))
            }),
        )
    }

    /// Open with a custom sink for new log files
    ///
    /// Existing logs are still read from `data_dir`.
    pub fn open_with_log_sink(config: Config, create_log: LogSinkFactory) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let comparator = InternalKeyComparator::default();
        let mem = Arc::new(MemTable::with_block_size(
            comparator.clone(),
            config.arena_block_size,
        ));

        let recovered_logs = Self::existing_logs(&config.data_dir)?;
        let mut recovery = RecoveryResult::default();
        for number in &recovered_logs {
            let path = Self::log_path(&config.data_dir, *number);
            let result = WalRecovery::recover(&path, &mem, &config)?;
            recovery.merge(&result);
        }

        if !recovered_logs.is_empty() {
            info!(
                logs = recovered_logs.len(),
                records = recovery.records_recovered,
                entries = recovery.entries_recovered,
                corruptions = recovery.corruptions,
                bytes_dropped = recovery.bytes_dropped,
                last_sequence = recovery.last_sequence,
                "recovered memtable from write-ahead logs"
            );
        }

        let log_number = recovered_logs.last().map_or(1, |n| n + 1);
        let log = LogWriter::new(create_log(&Self::log_path(&config.data_dir, log_number))?);

        let mut mem_logs = recovered_logs;
        mem_logs.push(log_number);

        let engine = Self {
            comparator,
            writer: Mutex::new(WriterState {
                log,
                log_number,
                next_log_number: log_number + 1,
                mem_logs,
                unsynced: 0,
                failed: None,
            }),
            create_log,
            mem: RwLock::new(mem),
            imm: RwLock::new(VecDeque::new()),
            last_sequence: AtomicU64::new(recovery.last_sequence),
            config,
        };

        // A recovered memtable that is already full is frozen right away.
        {
            let mut state = engine.writer.lock();
            if engine.mem.read().should_flush(engine.config.memtable_size_limit) {
                engine.rotate_locked(&mut state)?;
            }
        }

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Apply a batch atomically
    ///
    /// Steps:
    /// 1. Acquire the writer lock; refuse if an earlier log write failed
    /// 2. Decode the batch, so a malformed one never reaches the log
    /// 3. Stamp the batch with the next sequence number
    /// 4. Append to the WAL (durability), syncing per the strategy
    /// 5. Insert into the memtable (visibility)
    /// 6. Publish the new last sequence
    /// 7. Rotate if the memtable is full
    pub fn write(&self, batch: &mut WriteBatch) -> Result<()> {
        let mut state = self.writer.lock();
        Self::check_log(&state)?;
        batch.validate()?;

        let sequence = self.last_sequence.load(Ordering::Relaxed) + 1;
        batch.set_sequence(sequence);

        let logged = state
            .log
            .add_record(batch.contents())
            .and_then(|()| self.maybe_sync(&mut state));
        let mem = Arc::clone(&self.mem.read());
        let entries = match logged.and_then(|()| batch.insert_into(&mem)) {
            Ok(entries) => entries,
            Err(e) => return Err(Self::fail_log(&mut state, e)),
        };
        let last = sequence + entries as u64 - 1;
        self.last_sequence.store(last, Ordering::Release);

        debug!(sequence, entries, log = state.log_number, "applied write batch");

        if mem.should_flush(self.config.memtable_size_limit) {
            self.rotate_locked(&mut state)?;
        }
        Ok(())
    }

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(&mut batch)
    }

    /// Delete a key
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(&mut batch)
    }

    /// Get the latest value of a key
    ///
    /// Search order:
    /// 1. Active memtable (most recent writes)
    /// 2. Frozen memtables (newest to oldest)
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get_at(key, self.last_sequence())
    }

    /// Get the value of a key as of `sequence`
    pub fn get_at(&self, key: &[u8], sequence: SequenceNumber) -> Option<Vec<u8>> {
        let lookup = LookupKey::new(key, sequence);

        let mem = Arc::clone(&self.mem.read());
        let found = mem.get(&lookup).or_else(|| {
            let imm = self.imm.read();
            imm.iter().rev().find_map(|frozen| frozen.memtable.get(&lookup))
        });

        match found {
            Some(MemTableEntry::Value(value)) => Some(value),
            Some(MemTableEntry::Tombstone) | None => None,
        }
    }

    /// Freeze the active memtable and switch to a new log
    pub fn rotate(&self) -> Result<()> {
        let mut state = self.writer.lock();
        Self::check_log(&state)?;
        self.rotate_locked(&mut state)
    }

    /// Internal rotation (called with the writer lock held)
    fn rotate_locked(&self, state: &mut WriterState) -> Result<()> {
        if self.mem.read().is_empty() {
            return Ok(());
        }

        // Everything the frozen memtable holds must be durable in its logs.
        if let Err(e) = state.log.sync() {
            return Err(Self::fail_log(state, e));
        }
        state.unsynced = 0;

        let log_number = state.next_log_number;
        let file = (self.create_log)(&Self::log_path(&self.config.data_dir, log_number))?;
        state.log = LogWriter::new(file);
        state.log_number = log_number;
        state.next_log_number += 1;

        let fresh = Arc::new(MemTable::with_block_size(
            self.comparator.clone(),
            self.config.arena_block_size,
        ));
        let frozen = FrozenMemTable {
            memtable: Arc::clone(&self.mem.read()),
            log_numbers: std::mem::replace(&mut state.mem_logs, vec![log_number]),
        };

        info!(
            entries = frozen.memtable.entry_count(),
            memory_usage = frozen.memtable.approximate_memory_usage(),
            logs = ?frozen.log_numbers,
            new_log = log_number,
            "rotated memtable"
        );

        // Publish the frozen table before swapping so readers never miss it.
        self.imm.write().push_back(frozen);
        *self.mem.write() = fresh;
        Ok(())
    }

    /// The oldest frozen memtable, for the flush target to drain
    pub fn oldest_immutable(&self) -> Option<FrozenMemTable> {
        self.imm.read().front().cloned()
    }

    /// Drop a frozen memtable that has been durably flushed and delete its logs
    pub fn retire(&self, frozen: &FrozenMemTable) -> Result<()> {
        {
            let mut imm = self.imm.write();
            imm.retain(|m| !Arc::ptr_eq(&m.memtable, &frozen.memtable));
        }
        for number in &frozen.log_numbers {
            let path = Self::log_path(&self.config.data_dir, *number);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "deleted retired log"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Force the active log to disk
    pub fn sync(&self) -> Result<()> {
        let mut state = self.writer.lock();
        Self::check_log(&state)?;
        if let Err(e) = state.log.sync() {
            return Err(Self::fail_log(&mut state, e));
        }
        state.unsynced = 0;
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Syncs the active log; memtable contents stay recoverable from the logs.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    fn maybe_sync(&self, state: &mut WriterState) -> Result<()> {
        state.unsynced += 1;
        let due = match self.config.wal_sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => state.unsynced >= count,
        };
        if due {
            state.log.sync()?;
            state.unsynced = 0;
        }
        Ok(())
    }

    fn check_log(state: &WriterState) -> Result<()> {
        match &state.failed {
            Some(reason) => Err(DriftError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("log unwritable after earlier failure: {}", reason),
            ))),
            None => Ok(()),
        }
    }

    /// Remember the first log failure and hand the error back
    fn fail_log(state: &mut WriterState, e: DriftError) -> DriftError {
        if state.failed.is_none() {
            error!(error = %e, log = state.log_number, "write-ahead log failed, refusing further writes");
            state.failed = Some(e.to_string());
        }
        e
    }

    // =========================================================================
    // Log Files
    // =========================================================================

    fn log_path(dir: &Path, number: u64) -> PathBuf {
        dir.join(format!("{:06}{}", number, Self::LOG_SUFFIX))
    }

    fn parse_log_number(path: &Path) -> Option<u64> {
        path.file_name()?
            .to_str()?
            .strip_suffix(Self::LOG_SUFFIX)?
            .parse()
            .ok()
    }

    /// Log numbers present in `dir`, ascending
    fn existing_logs(dir: &Path) -> Result<Vec<u64>> {
        let mut numbers = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Some(number) = Self::parse_log_number(&path) {
                    numbers.push(number);
                }
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Highest sequence number visible to readers
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Number of the log currently appended to
    pub fn log_number(&self) -> u64 {
        self.writer.lock().log_number
    }

    /// Approximate memory used by the active memtable
    pub fn memtable_usage(&self) -> usize {
        self.mem.read().approximate_memory_usage()
    }

    /// Entries in the active memtable
    pub fn memtable_entry_count(&self) -> usize {
        self.mem.read().entry_count()
    }

    /// Number of frozen memtables awaiting flush
    pub fn immutable_count(&self) -> usize {
        self.imm.read().len()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
