//! Error types for fabric-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Details about a flash store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashFailure {
    /// Erase of the unit at `addr` failed
    Erase {
        /// Region offset of the erase unit
        addr: u32,
    },
    /// Programming at `addr` failed
    Program {
        /// Region offset of the page
        addr: u32,
    },
    /// Reading at `addr` failed
    Read {
        /// Region offset of the read
        addr: u32,
    },
    /// Data read back after programming did not match
    ReadBack {
        /// Region offset of the unit that was written
        addr: u32,
    },
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Transport errors
    /// Serial link failed to send
    LinkError,
    /// Payload does not fit in a single frame
    PacketTooLarge,

    // SPI / FPGA errors
    /// SPI transfer failed
    SpiTransferFailed,
    /// FPGA reported busy when it was expected to be idle
    FpgaBusy,
    /// FPGA identifier is not on the supported device list
    UnsupportedDevice(u32),

    // Storage errors
    /// Flash operation failed
    Flash(FlashFailure),
    /// Block plus its header does not fit in one erase unit
    BlockTooLarge,
    /// Block index is outside the reserved storage region
    BlockOutOfRange,
    /// No valid bitstream is stored
    NoStoredBitstream,
    /// Stored bitstream is valid but not marked for programming
    NotScheduled,

    // Block payload errors
    /// Compressed block failed to inflate
    DecompressFailed,
    /// Inflated length does not match the declared block size
    SizeMismatch {
        /// Size the host declared
        expected: u32,
        /// Size produced by decompression
        actual: u32,
    },
    /// Checksum does not match the declared value
    ChecksumMismatch {
        /// Checksum the host declared
        expected: u8,
        /// Checksum computed over the data
        actual: u8,
    },

    // Session errors
    /// A programming command arrived without an open session
    NoSession,
}

impl fmt::Display for FlashFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase { addr } => write!(f, "erase failed at offset 0x{:08X}", addr),
            Self::Program { addr } => write!(f, "program failed at offset 0x{:08X}", addr),
            Self::Read { addr } => write!(f, "read failed at offset 0x{:08X}", addr),
            Self::ReadBack { addr } => {
                write!(f, "read-back mismatch in unit at offset 0x{:08X}", addr)
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkError => write!(f, "serial link error"),
            Self::PacketTooLarge => write!(f, "packet too large for one frame"),
            Self::SpiTransferFailed => write!(f, "SPI transfer failed"),
            Self::FpgaBusy => write!(f, "FPGA is busy"),
            Self::UnsupportedDevice(id) => write!(f, "unsupported FPGA device id 0x{:08X}", id),
            Self::Flash(failure) => write!(f, "{}", failure),
            Self::BlockTooLarge => write!(f, "block does not fit in one erase unit"),
            Self::BlockOutOfRange => write!(f, "block index outside storage region"),
            Self::NoStoredBitstream => write!(f, "no valid bitstream stored"),
            Self::NotScheduled => write!(f, "stored bitstream not marked for programming"),
            Self::DecompressFailed => write!(f, "block decompression failed"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "block size mismatch: expected {}, got {}", expected, actual)
            }
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                expected, actual
            ),
            Self::NoSession => write!(f, "no programming session open"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
