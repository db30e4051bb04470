//! fabric-host - Host side of the fabric programmer protocol
//!
//! This crate talks to a fabric programmer over a serial port: it frames
//! requests, matches responses, and splits and compresses bitstreams into
//! the blocks the device inflates.
//!
//! # Example
//!
//! ```no_run
//! use fabric_host::{Fabric, NoProgress, SerialTransport};
//!
//! let transport = SerialTransport::open("/dev/ttyACM0", None)?;
//! let mut fabric = Fabric::new(transport);
//! println!("{}", fabric.query_device()?);
//!
//! let bitstream = std::fs::read("top.bit")?;
//! fabric.program(&bitstream, true, &mut NoProgress)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod discovery;
pub mod error;
pub mod transport;

// Re-exports
pub use client::{
    compress_block, max_saved_blocks, DeviceInfo, Fabric, FlashInfo, NoProgress, ProgramProgress,
    BLOCK_SIZE, DEFAULT_TIMEOUT_MS,
};
pub use discovery::{discover, find_first, FoundDevice};
pub use error::{FabricError, Result};
pub use fabric_core::fpga::DeviceId;
pub use transport::serial::SerialTransport;
pub use transport::{Transport, DEFAULT_BAUD};
