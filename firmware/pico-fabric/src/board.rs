//! Hardware bindings for the fabric-core traits

use cortex_m::peripheral::SCB;
use defmt::{debug, warn};
use embassy_rp::flash::{self, Blocking, Flash};
use embassy_rp::gpio::Output;
use embassy_rp::peripherals::{FLASH, SPI1, USB};
use embassy_rp::spi::{Async, Spi};
use embassy_rp::usb::Driver;
use embassy_time::{with_timeout, Duration, Timer};
use embassy_usb::class::cdc_acm::CdcAcmClass;
use embassy_usb::driver::EndpointError;
use fabric_core::error::{Error, FlashFailure, Result};
use fabric_core::hal::{FlashRegion, FpgaBus, Platform, SerialLink};

/// USB full speed bulk packet size
pub const USB_PACKET_SIZE: usize = 64;

/// Size of the Pico's QSPI flash
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// How long an idle poll waits for the host before giving the loop back
const IDLE_POLL_MS: u64 = 10;

pub type UsbDriver = Driver<'static, USB>;
pub type FlashDriver = Flash<'static, FLASH, Blocking, FLASH_SIZE>;

/// Serial link over USB CDC-ACM
pub struct UsbLink {
    class: CdcAcmClass<'static, UsbDriver>,
    rx: [u8; USB_PACKET_SIZE],
    rx_len: usize,
    rx_pos: usize,
    tx: heapless::Vec<u8, USB_PACKET_SIZE>,
    last_tx_full: bool,
}

impl UsbLink {
    pub fn new(class: CdcAcmClass<'static, UsbDriver>) -> Self {
        Self {
            class,
            rx: [0; USB_PACKET_SIZE],
            rx_len: 0,
            rx_pos: 0,
            tx: heapless::Vec::new(),
            last_tx_full: false,
        }
    }

    fn pop(&mut self) -> Option<u8> {
        if self.rx_pos < self.rx_len {
            self.rx_pos += 1;
            Some(self.rx[self.rx_pos - 1])
        } else {
            None
        }
    }

    async fn next_byte(&mut self) -> Option<u8> {
        loop {
            if let Some(byte) = self.pop() {
                return Some(byte);
            }
            match self.class.read_packet(&mut self.rx).await {
                Ok(n) => {
                    self.rx_len = n;
                    self.rx_pos = 0;
                }
                Err(EndpointError::Disabled) => {
                    self.class.wait_connection().await;
                    debug!("USB host connected");
                    return None;
                }
                Err(EndpointError::BufferOverflow) => return None,
            }
        }
    }

    async fn send_packet(&mut self) -> Result<()> {
        self.last_tx_full = self.tx.len() == USB_PACKET_SIZE;
        let sent = self.class.write_packet(&self.tx).await;
        self.tx.clear();
        sent.map_err(|_| Error::LinkError)
    }
}

impl SerialLink for UsbLink {
    async fn try_read_byte(&mut self) -> Option<u8> {
        if let Some(byte) = self.pop() {
            return Some(byte);
        }
        // Yields to the executor while the host is quiet
        with_timeout(Duration::from_millis(IDLE_POLL_MS), self.next_byte())
            .await
            .ok()
            .flatten()
    }

    async fn read_byte_timeout(&mut self, timeout_ms: u32) -> Option<u8> {
        with_timeout(Duration::from_millis(timeout_ms as u64), self.next_byte())
            .await
            .ok()
            .flatten()
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            if self.tx.is_full() {
                self.send_packet().await?;
            }
            // Room was made above
            let _ = self.tx.push(byte);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.tx.is_empty() {
            self.send_packet().await?;
        }
        if self.last_tx_full {
            // A full last packet needs a zero length packet to end the transfer
            self.last_tx_full = false;
            self.class
                .write_packet(&[])
                .await
                .map_err(|_| Error::LinkError)?;
        }
        Ok(())
    }
}

/// FPGA slave SPI port plus its control lines
pub struct FpgaSpi {
    spi: Spi<'static, SPI1, Async>,
    cs: Output<'static>,
    program_n: Output<'static>,
}

impl FpgaSpi {
    pub fn new(spi: Spi<'static, SPI1, Async>, cs: Output<'static>, program_n: Output<'static>) -> Self {
        Self { spi, cs, program_n }
    }
}

impl FpgaBus for FpgaSpi {
    fn select(&mut self) {
        self.cs.set_low();
    }

    fn deselect(&mut self) {
        self.cs.set_high();
    }

    fn set_program_n(&mut self, high: bool) {
        if high {
            self.program_n.set_high();
        } else {
            self.program_n.set_low();
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.spi
            .write(data)
            .await
            .map_err(|_| Error::SpiTransferFailed)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.spi
            .read(buf)
            .await
            .map_err(|_| Error::SpiTransferFailed)
    }

    async fn delay_ms(&mut self, ms: u32) {
        Timer::after_millis(ms as u64).await;
    }
}

/// Region at the top of the on-board flash
///
/// The ROM routines run with interrupts disabled and XIP suspended, so
/// erase and program stall the whole chip for their duration.
pub struct OnboardFlash {
    flash: FlashDriver,
    base: u32,
    size: u32,
}

impl OnboardFlash {
    pub fn new(flash: FlashDriver, base: u32, size: u32) -> Self {
        Self { flash, base, size }
    }
}

impl FlashRegion for OnboardFlash {
    fn size(&self) -> u32 {
        self.size
    }

    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.flash
            .blocking_read(self.base + addr, buf)
            .map_err(|_| Error::Flash(FlashFailure::Read { addr }))
    }

    async fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        let from = self.base + addr;
        self.flash
            .blocking_erase(from, from + len)
            .map_err(|e: flash::Error| {
                warn!("flash erase at 0x{:08X} failed: {}", from, e);
                Error::Flash(FlashFailure::Erase { addr })
            })
    }

    async fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.flash
            .blocking_write(self.base + addr, data)
            .map_err(|_| Error::Flash(FlashFailure::Program { addr }))
    }
}

/// Board identity and reset
pub struct Board {
    uid: [u8; 8],
}

impl Board {
    pub fn new(uid: [u8; 8]) -> Self {
        Self { uid }
    }
}

impl Platform for Board {
    fn unique_id(&mut self) -> [u8; 8] {
        self.uid
    }

    fn reboot(&mut self) {
        SCB::sys_reset();
    }
}
