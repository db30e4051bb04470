//! Checksum-framed serial transport
//!
//! Frame layout on the wire:
//!
//! ```text
//! [0x1B][len: u16 LE][payload: len - 1][checksum: u8]
//! ```
//!
//! `len` counts the payload plus the trailing checksum byte, which is the sum
//! of the payload bytes modulo 256. There is no acknowledgement at this
//! layer; a frame that fails any check is silently dropped.

mod frame;
mod framer;

pub use frame::{frame_header, FrameDecoder};
#[cfg(feature = "alloc")]
pub use frame::encode_frame;
pub use framer::Framer;

/// First byte of every frame
pub const MAGIC: u8 = 0x1B;

/// Bytes of framing around a payload (magic, length, checksum)
pub const FRAME_OVERHEAD: usize = 4;

/// How long the device waits for each byte after the magic, in milliseconds
pub const BYTE_TIMEOUT_MS: u32 = 100;

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - 1;
