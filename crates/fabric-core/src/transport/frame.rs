//! Frame encoding and a push-based decoder
//!
//! The device side reads frames with [`super::Framer`], which needs per-byte
//! timeouts. Hosts read whole chunks from an OS serial port and feed them to
//! [`FrameDecoder`] instead.

use super::{MAGIC, MAX_PAYLOAD_LEN};
use crate::checksum::sum8;
use crate::error::{Error, Result};

/// Magic and length bytes for a payload of `payload_len` bytes
pub fn frame_header(payload_len: usize) -> Result<[u8; 3]> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(Error::PacketTooLarge);
    }
    let len = (payload_len as u16 + 1).to_le_bytes();
    Ok([MAGIC, len[0], len[1]])
}

/// Encode a complete frame
#[cfg(feature = "alloc")]
pub fn encode_frame(payload: &[u8]) -> Result<alloc::vec::Vec<u8>> {
    let header = frame_header(payload.len())?;
    let mut frame = alloc::vec::Vec::with_capacity(payload.len() + super::FRAME_OVERHEAD);
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    frame.push(sum8(payload));
    Ok(frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Magic,
    LenLow,
    LenHigh(u8),
    Body { remaining: usize },
}

/// Incremental frame decoder with an `N` byte payload buffer
///
/// Bytes that do not start a frame are discarded. Frames whose payload does
/// not fit in `N` bytes, or whose checksum does not match, are dropped and
/// the decoder starts looking for the next magic byte.
#[derive(Debug)]
pub struct FrameDecoder<const N: usize> {
    state: State,
    buf: heapless::Vec<u8, N>,
}

impl<const N: usize> Default for FrameDecoder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameDecoder<N> {
    /// Create an idle decoder
    pub const fn new() -> Self {
        Self {
            state: State::Magic,
            buf: heapless::Vec::new(),
        }
    }

    /// Forget any partially received frame
    pub fn reset(&mut self) {
        self.state = State::Magic;
        self.buf.clear();
    }

    /// Feed one byte
    ///
    /// Returns the payload when `byte` completes a valid frame. The slice is
    /// valid until the next call.
    pub fn push(&mut self, byte: u8) -> Option<&[u8]> {
        match self.state {
            State::Magic => {
                if byte == MAGIC {
                    self.buf.clear();
                    self.state = State::LenLow;
                }
                None
            }
            State::LenLow => {
                self.state = State::LenHigh(byte);
                None
            }
            State::LenHigh(low) => {
                let len = u16::from_le_bytes([low, byte]) as usize;
                if len == 0 || len - 1 > N {
                    log::warn!("dropping frame with length {}", len);
                    self.state = State::Magic;
                } else {
                    self.state = State::Body { remaining: len };
                }
                None
            }
            State::Body { remaining } if remaining > 1 => {
                // Capacity was checked against the declared length
                let _ = self.buf.push(byte);
                self.state = State::Body {
                    remaining: remaining - 1,
                };
                None
            }
            State::Body { .. } => {
                self.state = State::Magic;
                let expected = sum8(&self.buf);
                if byte != expected {
                    log::warn!(
                        "dropping frame: checksum 0x{:02X}, expected 0x{:02X}",
                        byte,
                        expected
                    );
                    return None;
                }
                Some(self.buf.as_slice())
            }
        }
    }
}
