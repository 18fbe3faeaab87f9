//! WAL Writer
//!
//! Frames logical records into checksummed fragments inside fixed-size blocks.

use crate::coding::put_fixed32;
use crate::error::Result;
use crate::file::WritableFile;

use super::format::{
    extend_crc, mask_crc, type_crc, RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE,
};

/// Appends records to a log sink
///
/// Not internally synchronized: callers serialize `add_record`, normally under
/// the same lock that orders memtable inserts.
pub struct LogWriter<W: WritableFile> {
    dest: W,
    /// Current offset within the active block
    block_offset: usize,
    /// CRC of each record type byte, precomputed to seed fragment checksums
    type_crc: [u32; MAX_RECORD_TYPE as usize + 1],
}

impl<W: WritableFile> LogWriter<W> {
    /// Create a writer appending to an empty `dest`
    pub fn new(dest: W) -> Self {
        Self::with_offset(dest, 0)
    }

    /// Create a writer appending to `dest`, which already holds `dest_length` bytes
    pub fn with_offset(dest: W, dest_length: u64) -> Self {
        let mut seeds = [0u32; MAX_RECORD_TYPE as usize + 1];
        for (t, crc) in seeds.iter_mut().enumerate() {
            *crc = type_crc(t as u8);
        }
        Self {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
            type_crc: seeds,
        }
    }

    /// Append one logical record
    ///
    /// On success the fragments have been handed to the sink and flushed to
    /// the operating system; durability additionally needs [`LogWriter::sync`].
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let mut left = record;
        let mut begin = true;

        // Emit at least one physical record, even for an empty payload.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Too small for a header: pad with zeroes and switch blocks.
                if leftover > 0 {
                    const PADDING: [u8; HEADER_SIZE - 1] = [0; HEADER_SIZE - 1];
                    self.dest.append(&PADDING[..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.len().min(avail);
            let end = fragment_length == left.len();

            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            let (fragment, rest) = left.split_at(fragment_length);
            self.emit_physical_record(record_type, fragment)?;
            left = rest;
            begin = false;

            if left.is_empty() {
                return Ok(());
            }
        }
    }

    /// Make everything appended so far durable
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()
    }

    /// Offset within the current block
    pub fn block_offset(&self) -> usize {
        self.block_offset
    }

    pub fn get_ref(&self) -> &W {
        &self.dest
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.dest
    }

    pub fn into_inner(self) -> W {
        self.dest
    }

    fn emit_physical_record(&mut self, record_type: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= 0xffff);
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        let crc = extend_crc(self.type_crc[record_type as usize], payload);

        let mut header = Vec::with_capacity(HEADER_SIZE);
        put_fixed32(&mut header, mask_crc(crc));
        header.push((payload.len() & 0xff) as u8);
        header.push((payload.len() >> 8) as u8);
        header.push(record_type as u8);

        self.dest.append(&header)?;
        self.dest.append(payload)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }
}

impl<W: WritableFile> std::fmt::Debug for LogWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("block_offset", &self.block_offset)
            .finish()
    }
}
