//! Error types for host operations

use thiserror::Error;

/// Errors talking to a programmer
#[derive(Debug, Error)]
pub enum FabricError {
    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Framing or protocol layer error
    #[error("Protocol error: {0}")]
    Protocol(#[from] fabric_core::Error),

    /// No response arrived in time
    #[error("Timed out waiting for response to command 0x{0:02X}")]
    Timeout(u8),

    /// Response does not belong to the request
    #[error("Invalid response 0x{response:02X} for command 0x{command:02X}")]
    InvalidResponse {
        /// Command that was sent
        command: u8,
        /// Command byte of the response
        response: u8,
    },

    /// Response counter does not match the request
    #[error("Response counter {actual}, expected {expected}")]
    CounterMismatch {
        /// Counter that was sent
        expected: u8,
        /// Counter in the response
        actual: u8,
    },

    /// Response too short for its layout
    #[error("Response to command 0x{command:02X} is {len} bytes")]
    ShortResponse {
        /// Command that was sent
        command: u8,
        /// Received payload length
        len: usize,
    },

    /// Device reported a failure
    #[error("Device failed command 0x{command:02X} with code {code}")]
    Device {
        /// Command that failed
        command: u8,
        /// errorCode from the response
        code: u32,
    },

    /// Bitstream cannot be described by the block protocol
    #[error("Bitstream of {0} bytes is too large")]
    BitstreamTooLarge(usize),

    /// Bitstream needs more blocks than the flash store holds
    #[error("Bitstream needs {blocks} blocks but programmer flash holds {max}")]
    TooLargeToSave {
        /// Blocks the bitstream splits into
        blocks: usize,
        /// Store capacity in blocks
        max: usize,
    },

    /// No programmer answered
    #[error("No fabric programmer found")]
    NoDevice,
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, FabricError>;
