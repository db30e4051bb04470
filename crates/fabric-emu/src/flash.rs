//! NOR flash region emulator

use fabric_core::error::{Error, FlashFailure, Result};
use fabric_core::hal::FlashRegion;
use fabric_core::store::{StoreGeometry, ERASED, PAGE_SIZE, SECTOR_SIZE};

/// Failure to inject into flash operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every erase reports an error
    EraseFails,
    /// Every program reports an error
    ProgramFails,
    /// Programs report success but leave the cells untouched
    ProgramIgnored,
}

/// In-memory flash region
///
/// Erase sets whole units to 0xFF, programming can only clear bits.
/// Misaligned operations are rejected the way a real part would refuse them.
#[derive(Debug, Clone)]
pub struct EmuFlash {
    data: Vec<u8>,
    fault: Option<Fault>,
    erases: usize,
    programs: usize,
}

impl EmuFlash {
    /// Create an erased region of `units` erase units
    pub fn new(units: u32) -> Self {
        Self {
            data: vec![ERASED; (units * SECTOR_SIZE) as usize],
            fault: None,
            erases: 0,
            programs: 0,
        }
    }

    /// Create an erased region matching `geometry`
    pub fn with_geometry(geometry: StoreGeometry) -> Self {
        Self::new(geometry.units)
    }

    /// Region contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable region contents, for corrupting stored data in tests
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Inject a fault into subsequent operations, `None` to clear
    pub fn set_fault(&mut self, fault: Option<Fault>) {
        self.fault = fault;
    }

    /// Number of unit erases performed
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Number of page programs performed
    pub fn program_count(&self) -> usize {
        self.programs
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<usize> {
        let start = addr as usize;
        if start + len > self.data.len() {
            return Err(Error::Flash(FlashFailure::Read { addr }));
        }
        Ok(start)
    }
}

impl FlashRegion for EmuFlash {
    fn size(&self) -> u32 {
        self.data.len() as u32
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let start = self.check_range(addr, buf.len())?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        if addr % SECTOR_SIZE != 0 || len % SECTOR_SIZE != 0 {
            return Err(Error::Flash(FlashFailure::Erase { addr }));
        }
        if self.fault == Some(Fault::EraseFails) {
            return Err(Error::Flash(FlashFailure::Erase { addr }));
        }
        let start = self
            .check_range(addr, len as usize)
            .map_err(|_| Error::Flash(FlashFailure::Erase { addr }))?;
        self.data[start..start + len as usize].fill(ERASED);
        self.erases += (len / SECTOR_SIZE) as usize;
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if addr % PAGE_SIZE != 0 || data.len() % PAGE_SIZE as usize != 0 {
            return Err(Error::Flash(FlashFailure::Program { addr }));
        }
        let start = self
            .check_range(addr, data.len())
            .map_err(|_| Error::Flash(FlashFailure::Program { addr }))?;
        match self.fault {
            Some(Fault::ProgramFails) => return Err(Error::Flash(FlashFailure::Program { addr })),
            Some(Fault::ProgramIgnored) => {}
            _ => {
                for (cell, &byte) in self.data[start..start + data.len()].iter_mut().zip(data) {
                    *cell &= byte;
                }
            }
        }
        self.programs += data.len() / PAGE_SIZE as usize;
        Ok(())
    }
}
