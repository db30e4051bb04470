//! ECP5 slave-SPI model
//!
//! Decodes the byte stream seen inside each chip select window the way the
//! FPGA does: the first byte is the opcode, the next three are operands, and
//! register values are shifted out after that. Every bus action is appended
//! to an event log so tests can assert on exact sequencing.

use fabric_core::error::{Error, Result};
use fabric_core::fpga::opcodes;
use fabric_core::hal::FpgaBus;

/// Configuration for the emulated FPGA
#[derive(Debug, Clone)]
pub struct EmuFpgaConfig {
    /// IDCODE returned by READ_ID
    pub id: u32,
}

impl Default for EmuFpgaConfig {
    fn default() -> Self {
        Self {
            id: 0x4111_3043, // LFE5U-85F
        }
    }
}

/// Something the programmer did to the FPGA
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FpgaEvent {
    /// Chip select asserted
    Select,
    /// Chip select released
    Deselect,
    /// PROGRAMN driven
    ProgramN(bool),
    /// First byte of a transaction
    Command(u8),
    /// Configuration mode entered
    ConfigEnabled,
    /// Configuration mode left
    ConfigDisabled,
    /// A burst ended after delivering this many bitstream bytes
    BurstEnded(usize),
    /// Delay requested
    Delay(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Opcode,
    Operands { opcode: u8, seen: usize },
    Data { opcode: u8 },
}

/// Emulated ECP5
#[derive(Debug, Clone)]
pub struct EmuFpga {
    config: EmuFpgaConfig,
    busy: bool,
    fail_transfers: bool,
    config_mode: bool,
    program_n: bool,
    phase: Phase,
    read_pos: usize,
    burst_len: usize,
    bitstream: Vec<u8>,
    loading: Vec<u8>,
    configured: Option<Vec<u8>>,
    events: Vec<FpgaEvent>,
}

impl Default for EmuFpga {
    fn default() -> Self {
        Self::new(EmuFpgaConfig::default())
    }
}

impl EmuFpga {
    /// Create an idle FPGA
    pub fn new(config: EmuFpgaConfig) -> Self {
        Self {
            config,
            busy: false,
            fail_transfers: false,
            config_mode: false,
            program_n: true,
            phase: Phase::Idle,
            read_pos: 0,
            burst_len: 0,
            bitstream: Vec::new(),
            loading: Vec::new(),
            configured: None,
            events: Vec::new(),
        }
    }

    /// Set the value reported by the busy check and status register
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Make every SPI transfer fail
    pub fn set_fail_transfers(&mut self, fail: bool) {
        self.fail_transfers = fail;
    }

    /// Change the IDCODE
    pub fn set_id(&mut self, id: u32) {
        self.config.id = id;
    }

    /// True while in configuration mode
    pub fn in_config_mode(&self) -> bool {
        self.config_mode
    }

    /// True while chip select is asserted
    pub fn is_selected(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Every bitstream byte received in bursts since the last clear
    pub fn bitstream(&self) -> &[u8] {
        &self.bitstream
    }

    /// Bitstream loaded by the last completed configuration cycle
    pub fn configured(&self) -> Option<&[u8]> {
        self.configured.as_deref()
    }

    /// Event log
    pub fn events(&self) -> &[FpgaEvent] {
        &self.events
    }

    /// Forget logged events and received bitstream bytes
    pub fn clear_log(&mut self) {
        self.events.clear();
        self.bitstream.clear();
    }

    fn status_word(&self) -> u32 {
        let mut status = 0u32;
        if self.configured.is_some() {
            status |= 1 << 8;
        }
        if self.config_mode {
            status |= 1 << 9;
        }
        if self.busy {
            status |= 1 << 12;
        }
        status
    }

    fn register(&self, opcode: u8) -> Option<u32> {
        match opcode {
            opcodes::READ_ID => Some(self.config.id),
            opcodes::LSC_READ_STATUS => Some(self.status_word()),
            _ => None,
        }
    }

    fn output_byte(&self, opcode: u8, pos: usize) -> u8 {
        // Three operand bytes precede every response
        let Some(pos) = pos.checked_sub(opcodes::OPERAND_LEN) else {
            return 0;
        };
        if opcode == opcodes::LSC_CHECK_BUSY {
            return if pos == 0 { self.busy as u8 } else { 0 };
        }
        match self.register(opcode) {
            Some(value) if pos < 4 => value.to_be_bytes()[pos],
            _ => 0,
        }
    }

    fn finish_transaction(&mut self) {
        let opcode = match self.phase {
            Phase::Idle | Phase::Opcode => return,
            Phase::Operands { opcode, .. } | Phase::Data { opcode } => opcode,
        };
        match opcode {
            opcodes::ISC_ENABLE => {
                self.config_mode = true;
                self.loading.clear();
                self.events.push(FpgaEvent::ConfigEnabled);
            }
            opcodes::ISC_DISABLE => {
                if self.config_mode && !self.loading.is_empty() {
                    self.configured = Some(std::mem::take(&mut self.loading));
                }
                self.config_mode = false;
                self.events.push(FpgaEvent::ConfigDisabled);
            }
            opcodes::LSC_BITSTREAM_BURST => {
                self.events.push(FpgaEvent::BurstEnded(self.burst_len));
            }
            _ => {}
        }
    }

    fn clock_in(&mut self, byte: u8) {
        self.phase = match self.phase {
            Phase::Idle => Phase::Idle,
            Phase::Opcode => {
                self.events.push(FpgaEvent::Command(byte));
                self.read_pos = 1;
                self.burst_len = 0;
                Phase::Operands {
                    opcode: byte,
                    seen: 0,
                }
            }
            Phase::Operands { opcode, seen } if seen + 1 < opcodes::OPERAND_LEN => {
                Phase::Operands {
                    opcode,
                    seen: seen + 1,
                }
            }
            Phase::Operands { opcode, .. } => Phase::Data { opcode },
            Phase::Data { opcode } => {
                if opcode == opcodes::LSC_BITSTREAM_BURST {
                    self.bitstream.push(byte);
                    self.loading.push(byte);
                    self.burst_len += 1;
                }
                Phase::Data { opcode }
            }
        };
    }
}

impl FpgaBus for EmuFpga {
    fn select(&mut self) {
        self.events.push(FpgaEvent::Select);
        self.phase = Phase::Opcode;
    }

    fn deselect(&mut self) {
        self.finish_transaction();
        self.events.push(FpgaEvent::Deselect);
        self.phase = Phase::Idle;
    }

    fn set_program_n(&mut self, high: bool) {
        self.events.push(FpgaEvent::ProgramN(high));
        if self.program_n && !high {
            // Falling edge clears the configuration
            self.configured = None;
            self.config_mode = false;
        }
        self.program_n = high;
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.fail_transfers {
            return Err(Error::SpiTransferFailed);
        }
        for &byte in data {
            self.clock_in(byte);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.fail_transfers {
            return Err(Error::SpiTransferFailed);
        }
        let opcode = match self.phase {
            Phase::Operands { opcode, .. } | Phase::Data { opcode } => opcode,
            Phase::Idle | Phase::Opcode => {
                buf.fill(0xFF);
                return Ok(());
            }
        };
        for slot in buf.iter_mut() {
            // read_pos counts bytes after the opcode
            *slot = self.output_byte(opcode, self.read_pos - 1);
            self.read_pos += 1;
            self.clock_in(0);
        }
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) {
        self.events.push(FpgaEvent::Delay(ms));
    }
}
