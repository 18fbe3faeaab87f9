//! Configuration for driftkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::arena::DEFAULT_BLOCK_SIZE;
use crate::error::{DriftError, Result};

/// Main configuration for a driftkv write path
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for log files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── 000001.log       (write-ahead logs, one per memtable)
    ///     └── 000002.log
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Verify fragment checksums while reading logs
    pub verify_checksums: bool,

    /// Fail recovery on the first corruption instead of skipping it
    pub paranoid_checks: bool,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Approximate memtable size (in bytes) that triggers rotation
    pub memtable_size_limit: usize,

    /// Size of a standard arena block (in bytes)
    pub arena_block_size: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced writes (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./driftkv_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            verify_checksums: true,
            paranoid_checks: false,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            arena_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the write path cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_limit == 0 {
            return Err(DriftError::Config(
                "memtable_size_limit must be greater than zero".to_string(),
            ));
        }
        if self.arena_block_size == 0 {
            return Err(DriftError::Config(
                "arena_block_size must be greater than zero".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(DriftError::Config(
                "EveryNEntries sync count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all log files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Enable or disable checksum verification on read
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.config.verify_checksums = verify;
        self
    }

    /// Enable or disable strict recovery
    pub fn paranoid_checks(mut self, paranoid: bool) -> Self {
        self.config.paranoid_checks = paranoid;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the arena block size (in bytes)
    pub fn arena_block_size(mut self, size: usize) -> Self {
        self.config.arena_block_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
