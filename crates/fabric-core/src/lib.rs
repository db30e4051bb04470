//! fabric-core - Core library for the fabric FPGA programmer
//!
//! This crate contains everything the programmer firmware does that is not
//! tied to a particular board: the checksum-framed serial transport, the
//! flash-resident bitstream store, the ECP5 slave-SPI configuration sequencer
//! and the command dispatcher that drives them from host packets. It is
//! `no_std` and talks to the hardware only through the traits in [`hal`].
//!
//! # Features
//!
//! - `is_sync` (default) - Blocking traits, used on the host and in tests
//! - `std` - Enable standard library support (includes `alloc`)
//! - `alloc` - Enable heap allocation helpers
//!
//! Without `is_sync` the [`hal`] traits and every operation built on them are
//! `async`, which is how the embassy firmware uses the crate.
//!
//! # Example
//!
//! ```ignore
//! use fabric_core::dispatch::Dispatcher;
//!
//! fn serve<L, B, F, P>(mut dispatcher: Dispatcher<L, B, F, P>) -> !
//! where
//!     L: fabric_core::hal::SerialLink,
//!     B: fabric_core::hal::FpgaBus,
//!     F: fabric_core::hal::FlashRegion,
//!     P: fabric_core::hal::Platform,
//! {
//!     dispatcher.startup(false);
//!     loop {
//!         dispatcher.poll();
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Allow async fn in traits - we use maybe-async for dual sync/async support
#![allow(async_fn_in_trait)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod checksum;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod fpga;
pub mod hal;
pub mod protocol;
pub mod store;
pub mod transport;

pub use error::{Error, Result};
