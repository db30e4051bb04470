//! zlib block inflater
//!
//! Blocks arrive as zlib streams (RFC 1950) and are inflated into a fixed
//! buffer. The decompressor state is large, so one instance is kept and
//! reset between blocks instead of being rebuilt on the stack.

use crate::error::{Error, Result};
use miniz_oxide::inflate::core::inflate_flags::{
    TINFL_FLAG_PARSE_ZLIB_HEADER, TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF,
};
use miniz_oxide::inflate::core::{decompress, DecompressorOxide};
use miniz_oxide::inflate::TINFLStatus;

/// Reusable zlib inflater
pub struct Inflater {
    state: DecompressorOxide,
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflater {
    /// Create an inflater
    pub fn new() -> Self {
        Self {
            state: DecompressorOxide::new(),
        }
    }

    /// Inflate the complete zlib stream `input` into `output`
    ///
    /// Returns the number of bytes written. Fails with
    /// [`Error::DecompressFailed`] on a corrupt or truncated stream, or when
    /// the data does not fit in `output`.
    pub fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        self.state.init();
        let flags = TINFL_FLAG_PARSE_ZLIB_HEADER | TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF;
        let (status, _, written) = decompress(&mut self.state, input, output, 0, flags);
        match status {
            TINFLStatus::Done => Ok(written),
            other => {
                log::debug!("inflate stopped with {:?} after {} bytes", other, written);
                Err(Error::DecompressFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // zlib.compress(b"hello hello hello hello", 9)
    const HELLO: [u8; 16] = [
        0x78, 0xDA, 0xCB, 0x48, 0xCD, 0xC9, 0xC9, 0x57, 0xC8, 0x40, 0x27, 0x01, 0x68, 0x03, 0x08,
        0xB1,
    ];

    // zlib stored block holding b"abc"
    const STORED_ABC: [u8; 14] = [
        0x78, 0x01, 0x01, 0x03, 0x00, 0xFC, 0xFF, 0x61, 0x62, 0x63, 0x02, 0x4D, 0x01, 0x27,
    ];

    #[test]
    fn test_inflate_stored_block() {
        let mut inflater = Inflater::new();
        let mut out = [0u8; 16];
        let n = inflater.inflate(&STORED_ABC, &mut out).unwrap();
        assert_eq!(&out[..n], b"abc");
    }

    #[test]
    fn test_inflate_compressed() {
        let mut inflater = Inflater::new();
        let mut out = [0u8; 64];
        let n = inflater.inflate(&HELLO, &mut out).unwrap();
        assert_eq!(&out[..n], b"hello hello hello hello");
    }

    #[test]
    fn test_output_too_small() {
        let mut inflater = Inflater::new();
        let mut out = [0u8; 2];
        assert_eq!(
            inflater.inflate(&STORED_ABC, &mut out),
            Err(Error::DecompressFailed)
        );
    }

    #[test]
    fn test_garbage_rejected() {
        let mut inflater = Inflater::new();
        let mut out = [0u8; 16];
        assert_eq!(
            inflater.inflate(&[0x12, 0x34, 0x56], &mut out),
            Err(Error::DecompressFailed)
        );
        assert_eq!(inflater.inflate(&[], &mut out), Err(Error::DecompressFailed));
    }

    #[test]
    fn test_state_reset_between_blocks() {
        let mut inflater = Inflater::new();
        let mut out = [0u8; 64];
        assert!(inflater.inflate(&HELLO[..8], &mut out).is_err());
        let n = inflater.inflate(&STORED_ABC, &mut out).unwrap();
        assert_eq!(&out[..n], b"abc");
    }
}
