//! ECP5 slave-SPI configuration sequencer
//!
//! Drives the FPGA through the [`FpgaBus`] trait. Register reads clock out
//! the opcode, then clock in three operand bytes followed by the value, all
//! inside one chip select window. A bitstream burst keeps chip select low
//! from [`Ecp5::begin_bitstream_write`] until [`Ecp5::end_bitstream_write`],
//! so blocks can be streamed as they arrive.

pub mod opcodes;

use crate::error::{Error, Result};
use crate::hal::FpgaBus;
use bitflags::bitflags;
use core::fmt;
use maybe_async::maybe_async;
use opcodes::OPERAND_LEN;

/// Slave-SPI clock used for configuration
pub const SPI_CLOCK_HZ: u32 = 1_000_000;

/// Settle time after chip select is released at the end of a burst
pub const BURST_SETTLE_MS: u32 = 100;

/// How long PROGRAMN is held low, and the wait after releasing it
pub const PROGRAM_N_PULSE_MS: u32 = 100;

bitflags! {
    /// ECP5 configuration status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// Transparent mode
        const TRANSPARENT      = 1 << 0;
        /// JTAG port active
        const JTAG_ACTIVE      = 1 << 4;
        /// Password protection active
        const PWD_PROTECTION   = 1 << 5;
        /// Decryption enabled
        const DECRYPT_ENABLE   = 1 << 7;
        /// Configuration done
        const DONE             = 1 << 8;
        /// Configuration mode enabled
        const ISC_ENABLED      = 1 << 9;
        /// Write enabled
        const WRITE_ENABLE     = 1 << 10;
        /// Read enabled
        const READ_ENABLE      = 1 << 11;
        /// Device busy
        const BUSY             = 1 << 12;
        /// Last command failed
        const FAIL             = 1 << 13;
        /// Feature row OTP
        const FEATURE_OTP      = 1 << 14;
        /// Only encrypted bitstreams accepted
        const DECRYPT_ONLY     = 1 << 15;
        /// Password enabled
        const PWD_ENABLE       = 1 << 16;
        /// Encrypted preamble detected
        const ENCRYPT_PREAMBLE = 1 << 20;
        /// Standard preamble detected
        const STD_PREAMBLE     = 1 << 21;
        /// SPI master boot failed
        const SPIM_FAIL        = 1 << 22;
        /// Execution error
        const EXEC_ERROR       = 1 << 26;
        /// IDCODE in bitstream did not match
        const ID_ERROR         = 1 << 27;
        /// Invalid command received
        const INVALID_COMMAND  = 1 << 28;
        /// SED error
        const SED_ERROR        = 1 << 29;
        /// Bypass mode
        const BYPASS_MODE      = 1 << 30;
        /// Flow-through mode
        const FLOW_THROUGH     = 1 << 31;
    }
}

/// Raw 32-bit device IDCODE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// LFE5U-12 and LFE5U-25 (same die)
    pub const LFE5U_25: u32 = 0x0111_1043;
    /// LFE5U-45
    pub const LFE5U_45: u32 = 0x0111_2043;
    /// LFE5U-85
    pub const LFE5U_85: u32 = 0x0111_3043;

    /// IDCODE with the top nibble (package/speed variant) masked off
    pub const fn family_code(&self) -> u32 {
        self.0 & 0x0FFF_FFFF
    }

    /// True for parts the programmer will configure
    pub const fn is_supported(&self) -> bool {
        matches!(self.family_code(), Self::LFE5U_25 | Self::LFE5U_85)
    }

    /// Part name, if the family code is known
    pub const fn name(&self) -> Option<&'static str> {
        match self.family_code() {
            Self::LFE5U_25 => Some("LFE5U-12/25"),
            Self::LFE5U_45 => Some("LFE5U-45"),
            Self::LFE5U_85 => Some("LFE5U-85"),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "unknown (0x{:08X})", self.0),
        }
    }
}

/// ECP5 sequencer owning its bus
pub struct Ecp5<B> {
    bus: B,
}

impl<B> Ecp5<B> {
    /// Create a sequencer driving `bus`
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Borrow the bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutably borrow the bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

#[maybe_async]
impl<B: FpgaBus> Ecp5<B> {
    /// Send `opcode`, then clock in `N` bytes (operand padding included)
    async fn read_command<const N: usize>(&mut self, opcode: u8) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.bus.select();
        let result = match self.bus.write(&[opcode]).await {
            Ok(()) => self.bus.read(&mut buf).await,
            Err(e) => Err(e),
        };
        self.bus.deselect();
        result.map(|()| buf)
    }

    async fn read_u32(&mut self, opcode: u8) -> Result<u32> {
        let buf = self.read_command::<{ OPERAND_LEN + 4 }>(opcode).await?;
        Ok(u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]))
    }

    /// Read the IDCODE
    pub async fn read_id(&mut self) -> Result<DeviceId> {
        self.read_u32(opcodes::READ_ID).await.map(DeviceId)
    }

    /// Read the configuration status register
    pub async fn read_status(&mut self) -> Result<Status> {
        self.read_u32(opcodes::LSC_READ_STATUS)
            .await
            .map(Status::from_bits_retain)
    }

    /// Single busy check, true when the FPGA reports busy
    pub async fn poll_busy(&mut self) -> Result<bool> {
        let buf = self
            .read_command::<{ OPERAND_LEN + 1 }>(opcodes::LSC_CHECK_BUSY)
            .await?;
        Ok(buf[OPERAND_LEN] != 0)
    }

    /// Enter configuration mode
    pub async fn enable_config_mode(&mut self) -> Result<()> {
        self.read_command::<OPERAND_LEN>(opcodes::ISC_ENABLE)
            .await
            .map(|_| ())
    }

    /// Leave configuration mode
    pub async fn disable_config_mode(&mut self) -> Result<()> {
        self.read_command::<OPERAND_LEN>(opcodes::ISC_DISABLE)
            .await
            .map(|_| ())
    }

    /// Start a burst; chip select stays asserted on return
    pub async fn begin_bitstream_write(&mut self) -> Result<()> {
        self.bus.select();
        self.bus
            .write(&[opcodes::LSC_BITSTREAM_BURST, 0, 0, 0])
            .await
    }

    /// Stream bitstream bytes inside an open burst
    pub async fn write_bitstream_block(&mut self, data: &[u8]) -> Result<()> {
        self.bus.write(data).await
    }

    /// Release chip select and let the FPGA settle
    pub async fn end_bitstream_write(&mut self) {
        self.bus.deselect();
        self.bus.delay_ms(BURST_SETTLE_MS).await;
    }

    /// Close an interrupted burst and leave configuration mode
    ///
    /// Used when a session is abandoned by the host. The FPGA is given an
    /// extra settle period after configuration mode is left.
    pub async fn abort_configuration(&mut self) -> Result<()> {
        self.end_bitstream_write().await;
        let result = self.disable_config_mode().await;
        self.bus.delay_ms(BURST_SETTLE_MS).await;
        result
    }

    /// Leave configuration mode and report whether the FPGA is still busy
    pub async fn finish_configuration(&mut self) -> Result<bool> {
        self.disable_config_mode().await?;
        self.poll_busy().await
    }

    /// Pulse PROGRAMN to clear the FPGA configuration
    pub async fn reset(&mut self) {
        self.bus.set_program_n(false);
        self.bus.delay_ms(PROGRAM_N_PULSE_MS).await;
        self.bus.set_program_n(true);
        self.bus.delay_ms(PROGRAM_N_PULSE_MS).await;
    }

    /// Configure the FPGA with a complete bitstream in one call
    ///
    /// Resets the device, checks the IDCODE and the busy flag, then writes
    /// `bitstream` in a single burst.
    pub async fn program_device(&mut self, bitstream: &[u8]) -> Result<()> {
        self.reset().await;

        let id = self.read_id().await?;
        if !id.is_supported() {
            log::warn!("refusing to program device {}", id);
            return Err(Error::UnsupportedDevice(id.0));
        }
        if self.poll_busy().await? {
            return Err(Error::FpgaBusy);
        }

        self.enable_config_mode().await?;
        self.begin_bitstream_write().await?;
        let written = self.write_bitstream_block(bitstream).await;
        self.end_bitstream_write().await;
        written?;

        if self.finish_configuration().await? {
            return Err(Error::FpgaBusy);
        }
        Ok(())
    }
}
