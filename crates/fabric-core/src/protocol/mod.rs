//! Wire protocol between host and programmer
//!
//! Every frame payload starts with a [`PacketHeader`]: the command byte and a
//! counter that the device echoes back unchanged. The remaining bytes are a
//! fixed, packed little-endian layout per command, defined here with
//! `zerocopy` so both sides share one definition.

mod request;

pub use request::{ProgramBlock, Request};

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Command opcodes
pub mod cmd {
    /// Echo the payload back (self test)
    pub const ECHO: u8 = 0x00;
    /// Query FPGA id and programmer unique id
    pub const QUERY_DEVICE: u8 = 0x01;
    /// Begin a programming session
    pub const PROGRAM_DEVICE: u8 = 0x02;
    /// One compressed bitstream block
    pub const PROGRAM_BLOCK: u8 = 0x03;
    /// End of bitstream, commit and verify
    pub const PROGRAM_COMPLETE: u8 = 0x04;
    /// Query the bitstream stored in flash
    pub const QUERY_BITSTREAM_FLASH: u8 = 0x05;
    /// Program the FPGA from the stored bitstream
    pub const PROGRAM_BITSTREAM_FROM_FLASH: u8 = 0x06;
    /// Invalidate the stored bitstream
    pub const CLEAR_BITSTREAM_FLASH: u8 = 0x07;
    /// Reset the programmer
    pub const REBOOT_PROGRAMMER: u8 = 0x08;
    /// Sent once by the device after reset, never dispatched
    pub const DEVICE_STARTUP: u8 = 0xFE;
    /// Marker written into the command field of error responses
    pub const ERROR: u8 = 0xFF;
}

/// Error code reported for success
pub const STATUS_OK: u32 = 0;
/// Error code reported for any failure
pub const STATUS_ERROR: u32 = 1;

/// Header common to every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PacketHeader {
    /// Command opcode, see [`cmd`]
    pub command: u8,
    /// Host-chosen counter, echoed in the response
    pub counter: u8,
}

impl PacketHeader {
    /// Build a header
    pub const fn new(command: u8, counter: u8) -> Self {
        Self { command, counter }
    }

    /// Same counter, error marker as command
    pub const fn to_error(self) -> Self {
        Self {
            command: cmd::ERROR,
            counter: self.counter,
        }
    }
}

/// Response carrying only an error code
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GenericResponse {
    /// Echoed header
    pub header: PacketHeader,
    /// [`STATUS_OK`] or [`STATUS_ERROR`]
    pub error_code: U32,
}

impl GenericResponse {
    /// Build a response for `header` with the given code
    pub fn new(header: PacketHeader, error_code: u32) -> Self {
        Self {
            header,
            error_code: U32::new(error_code),
        }
    }
}

/// QueryDevice request
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct QueryDeviceRequest {
    /// Header
    pub header: PacketHeader,
    /// Unused
    pub reserved: u8,
}

/// QueryDevice response
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct QueryDeviceResponse {
    /// Echoed header
    pub header: PacketHeader,
    /// 1 when the attached FPGA is a supported part
    pub device_state: u8,
    /// Raw FPGA IDCODE
    pub fpga_device_id: U32,
    /// Programmer board unique id
    pub programmer_uid: [u8; 8],
}

/// ProgramDevice request (session begin)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ProgramDeviceRequest {
    /// Header
    pub header: PacketHeader,
    /// Non-zero to persist the bitstream to flash
    pub save_to_flash: u8,
    /// Total uncompressed bitstream size
    pub total_size: U32,
    /// Number of blocks that will follow
    pub block_count: U32,
    /// Informational, not checked by the device
    pub bitstream_checksum: U16,
}

/// Fixed part of a ProgramBlock request
///
/// Followed by a 2-byte big-endian raw size prefix and the zlib stream.
/// `compressed_block_size` counts the prefix and the zlib bytes.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ProgramBlockRequest {
    /// Header
    pub header: PacketHeader,
    /// Block index, starting at 0
    pub block_id: U16,
    /// Length of prefix plus compressed data
    pub compressed_block_size: U16,
    /// Uncompressed block size
    pub block_size: U16,
    /// Additive checksum of the uncompressed block
    pub block_checksum: u8,
}

/// Length of the raw size prefix in front of the zlib stream
pub const BLOCK_SIZE_PREFIX_LEN: usize = 2;

/// QueryBitstreamFlash response
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FlashQueryResponse {
    /// Echoed header
    pub header: PacketHeader,
    /// [`STATUS_ERROR`] when absent or invalid
    pub error_code: U32,
    /// Program-on-startup flag of the stored record
    pub program_on_startup: U32,
    /// Stored block count
    pub block_count: U32,
    /// Stored bitstream size
    pub bitstream_size: U32,
    /// Stored bitstream checksum
    pub checksum: u8,
}

impl FlashQueryResponse {
    /// Response reporting no valid stored bitstream
    pub fn invalid(header: PacketHeader) -> Self {
        Self {
            header,
            error_code: U32::new(STATUS_ERROR),
            program_on_startup: U32::ZERO,
            block_count: U32::ZERO,
            bitstream_size: U32::ZERO,
            checksum: 0,
        }
    }
}

/// Largest fixed-layout response
pub const MAX_RESPONSE_LEN: usize = core::mem::size_of::<FlashQueryResponse>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_sizes() {
        assert_eq!(core::mem::size_of::<PacketHeader>(), 2);
        assert_eq!(core::mem::size_of::<GenericResponse>(), 6);
        assert_eq!(core::mem::size_of::<QueryDeviceRequest>(), 3);
        assert_eq!(core::mem::size_of::<QueryDeviceResponse>(), 15);
        assert_eq!(core::mem::size_of::<ProgramDeviceRequest>(), 13);
        assert_eq!(core::mem::size_of::<ProgramBlockRequest>(), 9);
        assert_eq!(core::mem::size_of::<FlashQueryResponse>(), 19);
    }

    #[test]
    fn test_generic_response_layout() {
        let resp = GenericResponse::new(PacketHeader::new(cmd::PROGRAM_BLOCK, 7), 0x0102_0304);
        assert_eq!(resp.as_bytes(), &[0x03, 7, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_error_header_keeps_counter() {
        let header = PacketHeader::new(cmd::QUERY_DEVICE, 0x42).to_error();
        assert_eq!(header.command, cmd::ERROR);
        assert_eq!(header.counter, 0x42);
    }
}
