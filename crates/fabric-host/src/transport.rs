//! Transport layer abstraction
//!
//! The client only needs to push bytes out and pull whatever has arrived
//! within a timeout; framing is done above this layer.

use crate::error::{FabricError, Result};

/// Default serial baud rate
///
/// USB CDC ignores it, but the host serial stack still wants one.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Transport trait for reading and writing bytes
pub trait Transport {
    /// Write bytes to the transport
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read with timeout
    ///
    /// Reads up to `buf.len()` bytes, waiting up to `timeout_ms` milliseconds.
    /// Returns the number of bytes read, or 0 on timeout.
    fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize>;

    /// Flush any buffered output
    fn flush(&mut self) -> Result<()>;

    /// Drop any received bytes not read yet
    fn discard_input(&mut self) -> Result<()>;
}

/// Serial port transport
pub mod serial {
    use super::*;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::time::Duration;

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
        name: String,
    }

    impl SerialTransport {
        /// Open a serial port with the specified baud rate
        pub fn open(device: &str, baud: Option<u32>) -> Result<Self> {
            let baud_rate = baud.unwrap_or(DEFAULT_BAUD);

            let port = serialport::new(device, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(Duration::from_secs(5))
                .open()?;
            port.clear(ClearBuffer::All)?;

            log::debug!("Opened serial port {} at {} baud", device, baud_rate);

            Ok(Self {
                port,
                name: device.to_string(),
            })
        }

        /// Port name this transport was opened with
        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
            self.port
                .set_timeout(Duration::from_millis(timeout_ms as u64))?;

            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(FabricError::from(e)),
            }
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            Ok(())
        }

        fn discard_input(&mut self) -> Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }
    }
}
