//! Hardware abstraction traits
//!
//! The core never touches registers. Everything it needs from the board is
//! expressed by the traits in this module and implemented by the firmware
//! (real hardware) or by `fabric-emu` (tests and simulation).

mod traits;

pub use traits::*;
