//! Log Format
//!
//! Constants and checksum helpers shared by the log writer and reader.

/// Physical record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Reserved for preallocated (zero-filled) files
    Zero = 0,
    Full = 1,
    // Fragments of a record spanning blocks
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}

pub const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;

/// Size of every log block
pub const BLOCK_SIZE: usize = 32768;

/// Header is checksum (4 bytes), length (2 bytes), type (1 byte)
pub const HEADER_SIZE: usize = 4 + 2 + 1;

const MASK_DELTA: u32 = 0xa282_ead8;

/// Return a masked representation of `crc`.
///
/// Computing the CRC of a string that contains embedded CRCs is problematic,
/// so stored checksums are rotated and offset.
pub fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`]
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

/// CRC of the single type byte, the seed every fragment checksum extends
pub fn type_crc(record_type: u8) -> u32 {
    crc32fast::hash(&[record_type])
}

/// CRC over `type | payload`, extending a precomputed type seed
pub fn extend_crc(seed: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(seed);
    hasher.update(payload);
    hasher.finalize()
}
