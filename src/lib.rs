//! # driftkv
//!
//! The write path of a log-structured key-value store:
//! - Arena allocation for memtable memory
//! - Lock-free skip list (single writer, many readers)
//! - Multi-version memtable over internal keys
//! - Block-framed Write-Ahead Log (WAL) with checksummed fragments
//! - Crash recovery that tolerates torn and corrupted log tails
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │            (Single Writer / Multi Reader)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ WriteBatch
//!          ┌────────────┴────────────┐
//!          │ 1. append               │ 2. insert
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  LogWriter  │          │  MemTable   │──── frozen ───▶ flush target
//!   │ (32K blocks)│          │ (SkipList)  │                 (external)
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  LogReader  │─replay──▶│    Arena    │
//!   │ (recovery)  │          │             │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod coding;
pub mod arena;
pub mod comparator;
pub mod file;
pub mod memtable;
pub mod wal;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DriftError, Result};
pub use config::{Config, WalSyncStrategy};
pub use engine::{Engine, FrozenMemTable, LogSinkFactory};
pub use memtable::{LookupKey, MemTable, MemTableEntry, SequenceNumber, ValueType};
pub use wal::{LogReader, LogWriter, WriteBatch};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of driftkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
