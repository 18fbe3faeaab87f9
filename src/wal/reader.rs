//! WAL Reader
//!
//! Reads logical records back out of a log, reassembling fragments and
//! reporting (rather than failing on) corrupted regions.
//!
//! ## Corruption Handling
//! - Bad checksum, impossible length, unknown type: the rest of the current
//!   block is dropped and reported; reading resumes at the next block.
//! - `Middle`/`Last` without a `First`: the fragment is dropped and reported.
//! - `First`/`Full` while a record is open: the partial record is reported.
//! - Truncated tail (writer died mid-record): reported once, then EOF.
//! - Zero-type zero-length records (preallocated space): skipped silently.

use tracing::warn;

use crate::coding::decode_fixed32;
use crate::error::DriftError;
use crate::file::SequentialFile;

use super::format::{extend_crc, type_crc, unmask_crc, RecordType, BLOCK_SIZE, HEADER_SIZE};

/// Receives notice of dropped log bytes
pub trait Reporter {
    /// `bytes` were dropped from the log because of `reason`
    fn corruption(&mut self, bytes: usize, reason: &DriftError);
}

impl<F: FnMut(usize, &DriftError)> Reporter for F {
    fn corruption(&mut self, bytes: usize, reason: &DriftError) {
        self(bytes, reason)
    }
}

/// Outcome of reading one physical record
enum Physical {
    Record(RecordType),
    /// Unknown type byte; the fragment is still available for accounting
    Unknown(u8),
    /// Skippable or corrupt record, already reported where appropriate
    Bad,
    /// Partial record at end of file, `usize` bytes dropped
    Truncated(usize),
    Eof,
}

/// Reads records from a log source
pub struct LogReader<F: SequentialFile> {
    file: F,
    reporter: Option<Box<dyn Reporter + Send>>,
    checksum: bool,
    /// One block of file data
    backing: Box<[u8]>,
    /// Unconsumed window of `backing`
    buf_start: usize,
    buf_end: usize,
    /// Last read returned fewer than BLOCK_SIZE bytes
    eof: bool,
    /// Offset of the first byte of the last record returned
    last_record_offset: u64,
    /// File offset just past the end of `backing`'s valid data
    end_of_buffer_offset: u64,
    /// Records that start before this offset are not returned
    initial_offset: u64,
    /// Swallowing `Middle`/`Last` fragments after seeking to `initial_offset`
    resyncing: bool,
    /// The seek to `initial_offset`'s block has been done
    positioned: bool,
    /// Location of the fragment returned by the last physical read
    fragment_start: usize,
    fragment_end: usize,
    /// Reassembly buffer for fragmented records
    scratch: Vec<u8>,
}

impl<F: SequentialFile> LogReader<F> {
    /// Create a reader over `file`
    ///
    /// - `reporter`: receives dropped byte counts; `None` drops silently
    /// - `checksum`: verify fragment CRCs
    /// - `initial_offset`: return only records that start at or after this
    ///   physical offset
    pub fn new(
        file: F,
        reporter: Option<Box<dyn Reporter + Send>>,
        checksum: bool,
        initial_offset: u64,
    ) -> Self {
        Self {
            file,
            reporter,
            checksum,
            backing: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            buf_start: 0,
            buf_end: 0,
            eof: false,
            last_record_offset: 0,
            end_of_buffer_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
            positioned: initial_offset == 0,
            fragment_start: 0,
            fragment_end: 0,
            scratch: Vec::new(),
        }
    }

    /// Read the next record, or `None` at end of input
    pub fn read_record(&mut self) -> Option<Vec<u8>> {
        if !self.positioned {
            self.positioned = true;
            if !self.skip_to_initial_block() {
                return None;
            }
        }

        self.scratch.clear();
        let mut in_fragmented_record = false;
        // Offset of the first fragment of the record being assembled
        let mut prospective_record_offset = 0u64;

        loop {
            let physical = self.read_physical_record();
            let fragment_len = self.fragment_end - self.fragment_start;

            // Only meaningful for records that were actually returned.
            let physical_record_offset = self
                .end_of_buffer_offset
                .wrapping_sub(self.buffer_len() as u64)
                .wrapping_sub((HEADER_SIZE + fragment_len) as u64);

            // Orphaned tails of a record that began before initial_offset are
            // expected here, not corruption.
            if self.resyncing {
                match physical {
                    Physical::Record(RecordType::Middle)
                    | Physical::Record(RecordType::Last)
                    | Physical::Bad => continue,
                    _ => self.resyncing = false,
                }
            }

            match physical {
                Physical::Record(RecordType::Full) => {
                    if in_fragmented_record && !self.scratch.is_empty() {
                        self.report_corruption(self.scratch.len(), "partial record without end(1)");
                    }
                    self.scratch.clear();
                    self.last_record_offset = physical_record_offset;
                    return Some(self.fragment().to_vec());
                }
                Physical::Record(RecordType::First) => {
                    if in_fragmented_record && !self.scratch.is_empty() {
                        self.report_corruption(self.scratch.len(), "partial record without end(2)");
                    }
                    prospective_record_offset = physical_record_offset;
                    self.scratch.clear();
                    self.scratch
                        .extend_from_slice(&self.backing[self.fragment_start..self.fragment_end]);
                    in_fragmented_record = true;
                }
                Physical::Record(RecordType::Middle) => {
                    if in_fragmented_record {
                        self.scratch
                            .extend_from_slice(&self.backing[self.fragment_start..self.fragment_end]);
                    } else {
                        self.report_corruption(fragment_len, "missing start of fragmented record(1)");
                    }
                }
                Physical::Record(RecordType::Last) => {
                    if in_fragmented_record {
                        self.scratch
                            .extend_from_slice(&self.backing[self.fragment_start..self.fragment_end]);
                        self.last_record_offset = prospective_record_offset;
                        return Some(std::mem::take(&mut self.scratch));
                    }
                    self.report_corruption(fragment_len, "missing start of fragmented record(2)");
                }
                Physical::Eof => {
                    if in_fragmented_record && !self.scratch.is_empty() {
                        // The writer died between fragments of this record.
                        self.report_corruption(self.scratch.len(), "truncated record at end of file");
                        self.scratch.clear();
                    }
                    return None;
                }
                Physical::Truncated(dropped) => {
                    let pending = if in_fragmented_record { self.scratch.len() } else { 0 };
                    self.report_corruption(dropped + pending, "truncated record at end of file");
                    self.scratch.clear();
                    return None;
                }
                Physical::Bad => {
                    if in_fragmented_record {
                        self.report_corruption(self.scratch.len(), "error in middle of record");
                        in_fragmented_record = false;
                        self.scratch.clear();
                    }
                }
                Physical::Record(RecordType::Zero) | Physical::Unknown(_) => {
                    let type_byte = match physical {
                        Physical::Unknown(byte) => byte,
                        _ => RecordType::Zero as u8,
                    };
                    let pending = if in_fragmented_record { self.scratch.len() } else { 0 };
                    self.report_corruption(
                        fragment_len + pending,
                        &format!("unknown record type {}", type_byte),
                    );
                    in_fragmented_record = false;
                    self.scratch.clear();
                }
            }
        }
    }

    /// Physical offset of the last record returned by `read_record`
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Consume the reader as an iterator over records
    pub fn records(self) -> Records<F> {
        Records { reader: self }
    }

    pub fn into_inner(self) -> F {
        self.file
    }

    // =========================================================================
    // Physical Layer
    // =========================================================================

    fn buffer_len(&self) -> usize {
        self.buf_end - self.buf_start
    }

    fn fragment(&self) -> &[u8] {
        &self.backing[self.fragment_start..self.fragment_end]
    }

    fn clear_buffer(&mut self) {
        self.buf_start = 0;
        self.buf_end = 0;
    }

    /// Skip every block that ends before `initial_offset`
    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = self.initial_offset % BLOCK_SIZE as u64;
        let mut block_start = self.initial_offset - offset_in_block;

        // Offsets inside a block's trailer cannot start a record.
        if offset_in_block > (BLOCK_SIZE - 6) as u64 {
            block_start += BLOCK_SIZE as u64;
        }

        self.end_of_buffer_offset = block_start;

        if block_start > 0 {
            if let Err(e) = self.file.skip(block_start) {
                self.report_drop(block_start as usize, &e);
                self.eof = true;
                return false;
            }
        }
        true
    }

    fn read_physical_record(&mut self) -> Physical {
        self.fragment_start = 0;
        self.fragment_end = 0;

        loop {
            if self.buffer_len() < HEADER_SIZE {
                if !self.eof {
                    // The previous block's tail was padding; read the next block.
                    self.clear_buffer();
                    match self.file.read(&mut self.backing) {
                        Ok(n) => {
                            self.buf_end = n;
                            self.end_of_buffer_offset += n as u64;
                            if n < BLOCK_SIZE {
                                self.eof = true;
                            }
                        }
                        Err(e) => {
                            self.report_drop(BLOCK_SIZE, &e);
                            self.eof = true;
                            return Physical::Eof;
                        }
                    }
                    continue;
                }

                // A partial header at end of file is a truncated write, unless
                // it is zero padding.
                let tail = self.buffer_len();
                let is_padding = self.backing[self.buf_start..self.buf_end]
                    .iter()
                    .all(|&b| b == 0);
                self.clear_buffer();
                if tail == 0 || is_padding {
                    return Physical::Eof;
                }
                return Physical::Truncated(tail);
            }

            let header = &self.backing[self.buf_start..self.buf_start + HEADER_SIZE];
            let length = header[4] as usize | (header[5] as usize) << 8;
            let type_byte = header[6];

            if HEADER_SIZE + length > self.buffer_len() {
                let drop_size = self.buffer_len();
                self.clear_buffer();
                if !self.eof {
                    self.report_corruption(drop_size, "bad record length");
                    return Physical::Bad;
                }
                // The writer died while writing this record's payload.
                return Physical::Truncated(drop_size);
            }

            if type_byte == RecordType::Zero as u8 && length == 0 {
                // Preallocated, never-written space.
                self.clear_buffer();
                return Physical::Bad;
            }

            if self.checksum {
                let expected = unmask_crc(decode_fixed32(header));
                let payload_start = self.buf_start + HEADER_SIZE;
                let actual = extend_crc(
                    type_crc(type_byte),
                    &self.backing[payload_start..payload_start + length],
                );
                if actual != expected {
                    // The length itself may be corrupt, so drop the whole
                    // rest of the block rather than trusting it.
                    let drop_size = self.buffer_len();
                    self.clear_buffer();
                    self.report_corruption(drop_size, "checksum mismatch");
                    return Physical::Bad;
                }
            }

            self.fragment_start = self.buf_start + HEADER_SIZE;
            self.fragment_end = self.fragment_start + length;
            self.buf_start = self.fragment_end;

            // Skip physical records that started before initial_offset.
            let record_start = self.end_of_buffer_offset
                - self.buffer_len() as u64
                - (HEADER_SIZE + length) as u64;
            if record_start < self.initial_offset {
                self.fragment_end = self.fragment_start;
                return Physical::Bad;
            }

            return match RecordType::from_u8(type_byte) {
                Some(record_type) => Physical::Record(record_type),
                None => Physical::Unknown(type_byte),
            };
        }
    }

    fn report_corruption(&mut self, bytes: usize, reason: &str) {
        self.report_drop(bytes, &DriftError::corruption(reason));
    }

    fn report_drop(&mut self, bytes: usize, reason: &DriftError) {
        // Drops located entirely before initial_offset are not interesting.
        let drop_start = self
            .end_of_buffer_offset
            .checked_sub(self.buffer_len() as u64 + bytes as u64);
        let relevant = drop_start.map_or(true, |start| start >= self.initial_offset);
        if !relevant {
            return;
        }
        warn!(bytes, reason = %reason, "dropping log bytes");
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.corruption(bytes, reason);
        }
    }
}

/// Iterator over the records of a [`LogReader`]
pub struct Records<F: SequentialFile> {
    reader: LogReader<F>,
}

impl<F: SequentialFile> Records<F> {
    /// Offset of the record most recently yielded
    pub fn last_record_offset(&self) -> u64 {
        self.reader.last_record_offset()
    }
}

impl<F: SequentialFile> Iterator for Records<F> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record()
    }
}
