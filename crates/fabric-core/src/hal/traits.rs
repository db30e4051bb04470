//! Hardware trait definitions
//!
//! These traits use `maybe_async` to support both sync and async modes.
//! - With the `is_sync` feature (default), traits are blocking
//! - Without it, I/O methods become `async` (embassy firmware)
//!
//! Pin-level operations stay synchronous in both modes since driving a GPIO
//! never waits.

use crate::error::Result;
use maybe_async::maybe_async;

/// Byte-oriented serial link to the host
///
/// The framer only ever needs three primitives: a non-blocking poll for the
/// first byte of a frame, a bounded wait for each following byte, and a way
/// to push bytes out.
#[maybe_async(AFIT)]
pub trait SerialLink {
    /// Return the next received byte if one is already available
    ///
    /// Must not block. This is the idle-poll path of the control loop.
    async fn try_read_byte(&mut self) -> Option<u8>;

    /// Wait up to `timeout_ms` milliseconds for the next byte
    ///
    /// Returns `None` on timeout.
    async fn read_byte_timeout(&mut self, timeout_ms: u32) -> Option<u8>;

    /// Queue bytes for transmission
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Push any buffered output to the host
    async fn flush(&mut self) -> Result<()>;
}

/// Slave-SPI wiring of the FPGA
///
/// Chip select is driven explicitly because a bitstream burst keeps it
/// asserted across many transfers.
#[maybe_async(AFIT)]
pub trait FpgaBus {
    /// Drive chip select active (low)
    fn select(&mut self);

    /// Drive chip select inactive (high)
    fn deselect(&mut self);

    /// Drive the PROGRAMN reset line
    ///
    /// `high = false` holds the FPGA in its initial configuration state.
    fn set_program_n(&mut self, high: bool);

    /// Clock out `data`, discarding whatever is received
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Clock in `buf.len()` bytes while sending zeros
    async fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Delay for the specified number of milliseconds
    async fn delay_ms(&mut self, ms: u32);
}

/// Reserved region of non-volatile storage
///
/// Addresses are offsets from the start of the region. The region is made
/// of erase units of [`crate::store::SECTOR_SIZE`] bytes that are programmed
/// in pages of [`crate::store::PAGE_SIZE`] bytes.
#[maybe_async(AFIT)]
pub trait FlashRegion {
    /// Size of the region in bytes
    fn size(&self) -> u32;

    /// Read region contents into the provided buffer
    ///
    /// # Arguments
    /// * `addr` - Starting offset to read from
    /// * `buf` - Buffer to read into
    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Erase whole units, setting them to the erased fill value
    ///
    /// # Arguments
    /// * `addr` - Starting offset (unit aligned)
    /// * `len` - Number of bytes to erase (multiple of the unit size)
    async fn erase(&mut self, addr: u32, len: u32) -> Result<()>;

    /// Program erased cells
    ///
    /// # Arguments
    /// * `addr` - Starting offset (page aligned)
    /// * `data` - Data to program (whole pages)
    async fn write(&mut self, addr: u32, data: &[u8]) -> Result<()>;
}

/// Board services that are neither SPI nor storage
pub trait Platform {
    /// 64-bit unique identifier of the programmer board
    fn unique_id(&mut self) -> [u8; 8];

    /// Reset the programmer
    ///
    /// On hardware this does not return.
    fn reboot(&mut self);
}
