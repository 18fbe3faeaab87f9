//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append write batches before they reach the memtable
//! - CRC32 checksums on every fragment for corruption detection
//! - Fixed-size blocks so a reader can resynchronize after damage
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! ┌──────────────────────── block 0 (32 KiB) ────────────────────────┐
//! │ ┌─────────┬─────────┬──────────┬──────────┐ ┌────┬───┬───┬────┐  │
//! │ │ CRC (4) │ Len (2) │ Type (1) │ Payload  │ │CRC │Len│Typ│ .. │00│
//! │ └─────────┴─────────┴──────────┴──────────┘ └────┴───┴───┴────┘  │
//! ├──────────────────────── block 1 (32 KiB) ────────────────────────┤
//! │ ...                                                              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A record that does not fit in the rest of a block is split into `First`,
//! `Middle`* and `Last` fragments; one that fits is a single `Full` fragment.
//! Block tails shorter than a header are zero-filled.

mod batch;
pub mod format;
mod reader;
mod recovery;
mod writer;

pub use batch::{BatchIter, Operation, WriteBatch, BATCH_HEADER_SIZE};
pub use format::{RecordType, BLOCK_SIZE, HEADER_SIZE};
pub use reader::{LogReader, Records, Reporter};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::LogWriter;
