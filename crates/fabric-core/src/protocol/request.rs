//! Request decoding
//!
//! A received payload is decoded once into a [`Request`] so the dispatcher
//! handles every command, including the bad ones, in a single match.

use super::{
    cmd, PacketHeader, ProgramBlockRequest, ProgramDeviceRequest, QueryDeviceRequest,
    BLOCK_SIZE_PREFIX_LEN,
};
use zerocopy::FromBytes;

/// One compressed bitstream block as sent by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramBlock<'a> {
    /// Block index
    pub block_id: u16,
    /// Uncompressed size the host declared
    pub block_size: u16,
    /// Additive checksum of the uncompressed block
    pub block_checksum: u8,
    /// zlib stream, size prefix already stripped
    pub zlib: &'a [u8],
}

/// A decoded host request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Echo, carrying the complete payload including the header
    Echo(&'a [u8]),
    /// Query FPGA and programmer identity
    QueryDevice,
    /// Open a programming session
    ProgramDevice {
        /// Persist the streamed bitstream to flash
        save_to_flash: bool,
        /// Total uncompressed size
        total_size: u32,
        /// Number of blocks to expect
        block_count: u32,
    },
    /// Stream one block
    ProgramBlock(ProgramBlock<'a>),
    /// Close the session
    ProgramComplete,
    /// Report the stored bitstream
    QueryBitstreamFlash,
    /// Program the FPGA from flash
    ProgramBitstreamFromFlash,
    /// Invalidate the stored bitstream
    ClearBitstreamFlash,
    /// Reset the programmer
    RebootProgrammer,
    /// Known opcode with a payload too short for its layout
    Malformed(u8),
    /// Opcode the device does not handle
    Unknown(u8),
}

impl<'a> Request<'a> {
    /// Decode a payload
    ///
    /// Returns `None` when the payload is shorter than [`PacketHeader`],
    /// since there is no counter to answer with.
    pub fn parse(payload: &'a [u8]) -> Option<(PacketHeader, Request<'a>)> {
        let (header, _) = PacketHeader::read_from_prefix(payload).ok()?;
        let request = match header.command {
            cmd::ECHO => Request::Echo(payload),
            cmd::QUERY_DEVICE => match QueryDeviceRequest::read_from_prefix(payload) {
                Ok(_) => Request::QueryDevice,
                Err(_) => Request::Malformed(header.command),
            },
            cmd::PROGRAM_DEVICE => match ProgramDeviceRequest::read_from_prefix(payload) {
                Ok((req, _)) => Request::ProgramDevice {
                    save_to_flash: req.save_to_flash != 0,
                    total_size: req.total_size.get(),
                    block_count: req.block_count.get(),
                },
                Err(_) => Request::Malformed(header.command),
            },
            cmd::PROGRAM_BLOCK => parse_block(payload)
                .map(Request::ProgramBlock)
                .unwrap_or(Request::Malformed(header.command)),
            cmd::PROGRAM_COMPLETE => Request::ProgramComplete,
            cmd::QUERY_BITSTREAM_FLASH => Request::QueryBitstreamFlash,
            cmd::PROGRAM_BITSTREAM_FROM_FLASH => Request::ProgramBitstreamFromFlash,
            cmd::CLEAR_BITSTREAM_FLASH => Request::ClearBitstreamFlash,
            cmd::REBOOT_PROGRAMMER => Request::RebootProgrammer,
            other => Request::Unknown(other),
        };
        Some((header, request))
    }
}

fn parse_block(payload: &[u8]) -> Option<ProgramBlock<'_>> {
    let (req, rest) = ProgramBlockRequest::read_from_prefix(payload).ok()?;
    let declared = req.compressed_block_size.get() as usize;
    if declared < BLOCK_SIZE_PREFIX_LEN || declared > rest.len() {
        return None;
    }
    Some(ProgramBlock {
        block_id: req.block_id.get(),
        block_size: req.block_size.get(),
        block_checksum: req.block_checksum,
        zlib: &rest[BLOCK_SIZE_PREFIX_LEN..declared],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_payload_dropped() {
        assert_eq!(Request::parse(&[]), None);
        assert_eq!(Request::parse(&[cmd::ECHO]), None);
    }

    #[test]
    fn test_echo_keeps_whole_payload() {
        let payload = [cmd::ECHO, 3, 0xAA, 0xBB];
        let (header, req) = Request::parse(&payload).unwrap();
        assert_eq!(header, PacketHeader::new(cmd::ECHO, 3));
        assert_eq!(req, Request::Echo(&payload));
    }

    #[test]
    fn test_program_device_fields() {
        let payload = [
            cmd::PROGRAM_DEVICE,
            9,
            1,
            0x10,
            0x00,
            0x00,
            0x00,
            0x02,
            0x00,
            0x00,
            0x00,
            0x34,
            0x12,
        ];
        let (_, req) = Request::parse(&payload).unwrap();
        assert_eq!(
            req,
            Request::ProgramDevice {
                save_to_flash: true,
                total_size: 16,
                block_count: 2,
            }
        );
    }

    #[test]
    fn test_undersized_is_malformed() {
        let (header, req) = Request::parse(&[cmd::QUERY_DEVICE, 1]).unwrap();
        assert_eq!(header.counter, 1);
        assert_eq!(req, Request::Malformed(cmd::QUERY_DEVICE));

        let (_, req) = Request::parse(&[cmd::PROGRAM_DEVICE, 1, 0, 0]).unwrap();
        assert_eq!(req, Request::Malformed(cmd::PROGRAM_DEVICE));
    }

    #[test]
    fn test_block_strips_size_prefix() {
        // compressed_block_size = 5: 2 prefix bytes + 3 stream bytes
        let payload = [
            cmd::PROGRAM_BLOCK,
            4,
            0x01,
            0x00,
            0x05,
            0x00,
            0x0A,
            0x00,
            0x37,
            0x00,
            0x0A,
            0x78,
            0x01,
            0x02,
        ];
        let (_, req) = Request::parse(&payload).unwrap();
        assert_eq!(
            req,
            Request::ProgramBlock(ProgramBlock {
                block_id: 1,
                block_size: 10,
                block_checksum: 0x37,
                zlib: &[0x78, 0x01, 0x02],
            })
        );
    }

    #[test]
    fn test_block_declared_size_overruns_payload() {
        let payload = [cmd::PROGRAM_BLOCK, 4, 0, 0, 0x40, 0, 1, 0, 0, 0, 1, 0x78];
        let (_, req) = Request::parse(&payload).unwrap();
        assert_eq!(req, Request::Malformed(cmd::PROGRAM_BLOCK));
    }

    #[test]
    fn test_unknown_opcode() {
        let (_, req) = Request::parse(&[0x42, 0]).unwrap();
        assert_eq!(req, Request::Unknown(0x42));
        let (_, req) = Request::parse(&[cmd::DEVICE_STARTUP, 0]).unwrap();
        assert_eq!(req, Request::Unknown(cmd::DEVICE_STARTUP));
    }
}
