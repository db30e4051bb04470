//! Board services

use fabric_core::hal::Platform;

/// Unique id reported by a default [`EmuPlatform`]
pub const DEFAULT_UID: [u8; 8] = [0xE6, 0x60, 0x58, 0x38, 0x83, 0x2F, 0x1A, 0x2B];

/// Emulated board: a fixed unique id and a reboot counter
#[derive(Debug, Clone)]
pub struct EmuPlatform {
    uid: [u8; 8],
    reboots: usize,
}

impl Default for EmuPlatform {
    fn default() -> Self {
        Self::new(DEFAULT_UID)
    }
}

impl EmuPlatform {
    /// Create a board reporting `uid`
    pub fn new(uid: [u8; 8]) -> Self {
        Self { uid, reboots: 0 }
    }

    /// How many times the dispatcher asked for a reboot
    pub fn reboot_count(&self) -> usize {
        self.reboots
    }
}

impl Platform for EmuPlatform {
    fn unique_id(&mut self) -> [u8; 8] {
        self.uid
    }

    fn reboot(&mut self) {
        log::info!("emulated reboot");
        self.reboots += 1;
    }
}
