//! On-flash layout of the bitstream store
//!
//! ```text
//! unit 0      page 0: BitstreamRecord (19 bytes, rest 0xFF)
//! unit i + 1  BlockHeader (9 bytes) followed by the block bytes
//! ```
//!
//! All fields are packed little-endian.

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Erase unit size in bytes
pub const SECTOR_SIZE: u32 = 4096;

/// Program page size in bytes
pub const PAGE_SIZE: u32 = 256;

/// Value of an erased byte
pub const ERASED: u8 = 0xFF;

/// Marks a record that has been written at least once
pub const RECORD_MAGIC: u32 = 0xF1F0_DE0E;

/// Size of the encoded [`BitstreamRecord`]
pub const RECORD_LEN: usize = core::mem::size_of::<RecordLayout>();

/// Size of the encoded [`BlockHeader`]
pub const BLOCK_HEADER_LEN: usize = core::mem::size_of::<BlockHeaderLayout>();

/// Most block bytes that fit in one unit after the header
pub const MAX_BLOCK_DATA: usize = SECTOR_SIZE as usize - BLOCK_HEADER_LEN;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct RecordLayout {
    magic: U32,
    program_on_startup: U32,
    block_count: U32,
    total_size: U32,
    checksum: u8,
    checksum_plus1: u8,
    checksum_plus2: u8,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct BlockHeaderLayout {
    block_id: U32,
    block_size: U32,
    block_checksum: u8,
}

/// Metadata describing the stored bitstream
///
/// Flash may hold arbitrary data, so the checksum is stored three times
/// (`c`, `c + 1`, `c + 2`) and all three must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitstreamRecord {
    /// [`RECORD_MAGIC`] when present
    pub magic: u32,
    /// Non-zero to program the FPGA at startup
    pub program_on_startup: u32,
    /// Number of stored blocks
    pub block_count: u32,
    /// Total bitstream size in bytes
    pub total_size: u32,
    /// Sum of every stored byte modulo 256
    pub checksum: u8,
    /// `checksum + 1` when valid
    pub checksum_plus1: u8,
    /// `checksum + 2` when valid
    pub checksum_plus2: u8,
}

impl BitstreamRecord {
    /// Build a complete record with derived checksum fields
    pub fn new(program_on_startup: bool, block_count: u32, total_size: u32, checksum: u8) -> Self {
        Self {
            magic: RECORD_MAGIC,
            program_on_startup: program_on_startup as u32,
            block_count,
            total_size,
            checksum,
            checksum_plus1: checksum.wrapping_add(1),
            checksum_plus2: checksum.wrapping_add(2),
        }
    }

    /// The all-zero record written by a clear
    pub const fn cleared() -> Self {
        Self {
            magic: 0,
            program_on_startup: 0,
            block_count: 0,
            total_size: 0,
            checksum: 0,
            checksum_plus1: 0,
            checksum_plus2: 0,
        }
    }

    /// True when the magic marks a written record
    pub fn is_present(&self) -> bool {
        self.magic == RECORD_MAGIC
    }

    /// True when the derived checksum fields agree with `checksum`
    pub fn derived_checksums_hold(&self) -> bool {
        self.checksum_plus1 == self.checksum.wrapping_add(1)
            && self.checksum_plus2 == self.checksum.wrapping_add(2)
    }

    /// Encode to the on-flash byte layout
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let layout = RecordLayout {
            magic: U32::new(self.magic),
            program_on_startup: U32::new(self.program_on_startup),
            block_count: U32::new(self.block_count),
            total_size: U32::new(self.total_size),
            checksum: self.checksum,
            checksum_plus1: self.checksum_plus1,
            checksum_plus2: self.checksum_plus2,
        };
        let mut out = [0u8; RECORD_LEN];
        out.copy_from_slice(layout.as_bytes());
        out
    }

    /// Decode from the on-flash byte layout
    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Self {
        // The array length equals the layout size, so this cannot fail
        let layout = RecordLayout::read_from_bytes(bytes.as_slice())
            .unwrap_or_else(|_| RecordLayout::new_zeroed());
        Self {
            magic: layout.magic.get(),
            program_on_startup: layout.program_on_startup.get(),
            block_count: layout.block_count.get(),
            total_size: layout.total_size.get(),
            checksum: layout.checksum,
            checksum_plus1: layout.checksum_plus1,
            checksum_plus2: layout.checksum_plus2,
        }
    }
}

/// Header at the start of every block unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Index the block was written under
    pub block_id: u32,
    /// Number of block bytes following the header
    pub block_size: u32,
    /// Sum of the block bytes modulo 256
    pub block_checksum: u8,
}

impl BlockHeader {
    /// Encode to the on-flash byte layout
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_LEN] {
        let layout = BlockHeaderLayout {
            block_id: U32::new(self.block_id),
            block_size: U32::new(self.block_size),
            block_checksum: self.block_checksum,
        };
        let mut out = [0u8; BLOCK_HEADER_LEN];
        out.copy_from_slice(layout.as_bytes());
        out
    }

    /// Decode from the on-flash byte layout
    pub fn from_bytes(bytes: &[u8; BLOCK_HEADER_LEN]) -> Self {
        let layout = BlockHeaderLayout::read_from_bytes(bytes.as_slice())
            .unwrap_or_else(|_| BlockHeaderLayout::new_zeroed());
        Self {
            block_id: layout.block_id.get(),
            block_size: layout.block_size.get(),
            block_checksum: layout.block_checksum,
        }
    }
}

/// Size and placement of the reserved region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreGeometry {
    /// Number of erase units in the region
    pub units: u32,
}

impl Default for StoreGeometry {
    fn default() -> Self {
        // 1 MiB at the top of the device flash
        Self { units: 256 }
    }
}

impl StoreGeometry {
    /// Region size in bytes
    pub const fn size(&self) -> u32 {
        self.units * SECTOR_SIZE
    }

    /// Largest number of blocks the region can hold
    pub const fn max_blocks(&self) -> u32 {
        self.units.saturating_sub(1)
    }

    /// Offset of the unit holding `block_id`
    pub const fn block_offset(&self, block_id: u32) -> u32 {
        (block_id + 1) * SECTOR_SIZE
    }
}
