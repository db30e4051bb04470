//! Loopback serial link
//!
//! Bytes queued by the host side with [`EmuLink::inject`] are what the
//! device reads; everything the device writes collects in a transmit buffer
//! until [`EmuLink::take_output`] drains it. Reads never wait, so a timeout is
//! simply an empty receive queue.

use std::collections::VecDeque;

use fabric_core::error::{Error, Result};
use fabric_core::hal::SerialLink;

/// In-memory serial link
#[derive(Debug, Default, Clone)]
pub struct EmuLink {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    flushes: usize,
    broken: bool,
}

impl EmuLink {
    /// Create an empty link
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the device to read
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Number of bytes the device has not read yet
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Drain everything the device has written
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }

    /// Number of flushes requested by the device
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Make every write fail, as if the host had gone away
    pub fn set_broken(&mut self, broken: bool) {
        self.broken = broken;
    }
}

impl SerialLink for EmuLink {
    fn try_read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn read_byte_timeout(&mut self, _timeout_ms: u32) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.broken {
            return Err(Error::LinkError);
        }
        self.tx.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.broken {
            return Err(Error::LinkError);
        }
        self.flushes += 1;
        Ok(())
    }
}
