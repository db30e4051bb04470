//! ECP5 slave-SPI configuration opcodes
//!
//! Only the subset used for SRAM configuration is listed. Every command is
//! a single opcode byte followed by three operand bytes, which this device
//! family ignores for the commands below.

/// Read the 32-bit IDCODE
pub const READ_ID: u8 = 0xE0;
/// Read the 32-bit configuration status register
pub const LSC_READ_STATUS: u8 = 0x3C;
/// Read the busy flag
pub const LSC_CHECK_BUSY: u8 = 0xF0;
/// Enter configuration (ISC) mode
pub const ISC_ENABLE: u8 = 0xC6;
/// Leave configuration mode and start the loaded design
pub const ISC_DISABLE: u8 = 0x26;
/// Stream a bitstream while chip select stays asserted
pub const LSC_BITSTREAM_BURST: u8 = 0x7A;

/// Operand bytes clocked after every opcode
pub const OPERAND_LEN: usize = 3;
