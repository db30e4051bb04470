//! Programming session state

use crate::checksum::Checksum;
use crate::store::BitstreamRecord;

/// Whether streamed blocks are also written to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    /// Host did not ask for the bitstream to be saved
    Disabled,
    /// Blocks are written to the store as they arrive
    Enabled,
    /// A block write failed; streaming continues, nothing more is stored
    SilentlyDisabled,
}

/// An open programming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammingSession {
    /// Persistence state
    pub persist: Persist,
    /// Sum of the block checksums stored so far
    pub running_checksum: Checksum,
    /// Block count announced by the host
    pub block_count: u32,
    /// Total size announced by the host
    pub total_size: u32,
}

impl ProgrammingSession {
    /// Start a session
    pub fn new(save_to_flash: bool, block_count: u32, total_size: u32) -> Self {
        Self {
            persist: if save_to_flash {
                Persist::Enabled
            } else {
                Persist::Disabled
            },
            running_checksum: Checksum::new(),
            block_count,
            total_size,
        }
    }

    /// Record to commit once the bitstream has been accepted
    ///
    /// Streamed bitstreams are always marked for programming at startup.
    pub fn record(&self) -> BitstreamRecord {
        BitstreamRecord::new(
            true,
            self.block_count,
            self.total_size,
            self.running_checksum.value(),
        )
    }
}

/// Dispatcher session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Session in progress
    Open(ProgrammingSession),
}

impl SessionState {
    /// True while a session is open
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open(_))
    }

    /// Take the session out, leaving [`SessionState::Idle`]
    pub fn take(&mut self) -> Option<ProgrammingSession> {
        match core::mem::take(self) {
            SessionState::Open(session) => Some(session),
            SessionState::Idle => None,
        }
    }
}
