//! fabric-emu - In-memory emulation of the fabric programmer
//!
//! This crate implements the `fabric-core` hardware traits on top of plain
//! memory: an ECP5 that decodes its slave-SPI byte stream, a NOR flash
//! region, a loopback serial link and a board with a fixed unique id.
//! [`EmuDevice`] wires them into a complete dispatcher so the firmware logic
//! and the host library can be exercised without hardware.

mod flash;
mod fpga;
mod link;
mod platform;

pub use flash::{EmuFlash, Fault};
pub use fpga::{EmuFpga, EmuFpgaConfig, FpgaEvent};
pub use link::EmuLink;
pub use platform::{EmuPlatform, DEFAULT_UID};

use fabric_core::dispatch::{Dispatcher, Persist, SessionState, REQUEST_BUFFER_LEN};
use fabric_core::error::Result;
use fabric_core::fpga::Ecp5;
use fabric_core::store::{BitstreamStore, StoreGeometry};
use fabric_core::transport::{encode_frame, FrameDecoder};

type EmuDispatcher = Dispatcher<EmuLink, EmuFpga, EmuFlash, EmuPlatform>;

/// A complete emulated programmer
///
/// Requests go in as payloads and are framed on the way to the device;
/// responses come back decoded. The device only runs when [`EmuDevice::pump`]
/// (or [`EmuDevice::request`]) is called.
pub struct EmuDevice {
    dispatcher: Box<EmuDispatcher>,
    decoder: FrameDecoder<REQUEST_BUFFER_LEN>,
}

impl Default for EmuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl EmuDevice {
    /// Programmer with a supported FPGA and an empty store
    pub fn new() -> Self {
        let geometry = StoreGeometry::default();
        Self::with_parts(
            EmuFpga::default(),
            EmuFlash::with_geometry(geometry),
            EmuPlatform::default(),
            geometry,
        )
    }

    /// Programmer built from the given parts
    pub fn with_parts(
        fpga: EmuFpga,
        flash: EmuFlash,
        platform: EmuPlatform,
        geometry: StoreGeometry,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            EmuLink::new(),
            Ecp5::new(fpga),
            BitstreamStore::new(flash, geometry),
            platform,
        );
        Self {
            dispatcher: Box::new(dispatcher),
            decoder: FrameDecoder::new(),
        }
    }

    /// Run the power-on sequence and return what the device sent
    pub fn startup(&mut self, auto_program: bool) -> Result<Vec<Vec<u8>>> {
        self.dispatcher.startup(auto_program)?;
        Ok(self.responses())
    }

    /// Frame `payload` and queue it for the device
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload)?;
        self.link_mut().inject(&frame);
        Ok(())
    }

    /// Queue raw bytes for the device, bypassing framing
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.link_mut().inject(bytes);
    }

    /// Let the device run until its receive queue is empty
    ///
    /// Returns the number of frames that were served.
    pub fn pump(&mut self) -> usize {
        let mut served = 0;
        while self.link().pending() > 0 {
            if self.dispatcher.poll() {
                served += 1;
            }
        }
        served
    }

    /// Decode every complete frame the device has sent since the last call
    pub fn responses(&mut self) -> Vec<Vec<u8>> {
        let output = self.link_mut().take_output();
        let mut frames = Vec::new();
        for byte in output {
            if let Some(payload) = self.decoder.push(byte) {
                frames.push(payload.to_vec());
            }
        }
        frames
    }

    /// Send one request, run the device and collect its responses
    pub fn request(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.send(payload)?;
        self.pump();
        Ok(self.responses())
    }

    /// Serial link
    pub fn link(&self) -> &EmuLink {
        self.dispatcher.framer().link()
    }

    /// Mutable serial link
    pub fn link_mut(&mut self) -> &mut EmuLink {
        self.dispatcher.framer_mut().link_mut()
    }

    /// Emulated FPGA
    pub fn fpga(&self) -> &EmuFpga {
        self.dispatcher.programmer().fpga().bus()
    }

    /// Mutable emulated FPGA
    pub fn fpga_mut(&mut self) -> &mut EmuFpga {
        self.dispatcher.programmer_mut().fpga_mut().bus_mut()
    }

    /// Emulated flash region
    pub fn flash(&self) -> &EmuFlash {
        self.dispatcher.programmer().store().flash()
    }

    /// Mutable emulated flash region
    pub fn flash_mut(&mut self) -> &mut EmuFlash {
        self.dispatcher.programmer_mut().store_mut().flash_mut()
    }

    /// Emulated board
    pub fn platform(&self) -> &EmuPlatform {
        self.dispatcher.programmer().platform()
    }

    /// True while a programming session is open
    pub fn session_open(&self) -> bool {
        matches!(self.dispatcher.programmer().session(), SessionState::Open(_))
    }

    /// Persistence state of the open session
    pub fn session_persist(&self) -> Option<Persist> {
        match self.dispatcher.programmer().session() {
            SessionState::Open(session) => Some(session.persist),
            SessionState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_core::checksum::sum8;
    use fabric_core::fpga::opcodes;
    use fabric_core::protocol::cmd;
    use fabric_core::hal::FpgaBus;
    use miniz_oxide::deflate::compress_to_vec_zlib;

    const BLOCK: [u8; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

    fn ok(command: u8, counter: u8) -> Vec<u8> {
        vec![command, counter, 0, 0, 0, 0]
    }

    fn rejected(counter: u8) -> Vec<u8> {
        vec![cmd::ERROR, counter, 1, 0, 0, 0]
    }

    fn program_device(counter: u8, save: bool, total: u32, count: u32) -> Vec<u8> {
        let mut p = vec![cmd::PROGRAM_DEVICE, counter, save as u8];
        p.extend_from_slice(&total.to_le_bytes());
        p.extend_from_slice(&count.to_le_bytes());
        p.extend_from_slice(&[0, 0]);
        p
    }

    fn program_block(counter: u8, id: u16, declared_size: u16, data: &[u8]) -> Vec<u8> {
        let zlib = compress_to_vec_zlib(data, 9);
        let compressed = (zlib.len() + 2) as u16;
        let mut p = vec![cmd::PROGRAM_BLOCK, counter];
        p.extend_from_slice(&id.to_le_bytes());
        p.extend_from_slice(&compressed.to_le_bytes());
        p.extend_from_slice(&declared_size.to_le_bytes());
        p.push(sum8(data));
        p.extend_from_slice(&(data.len() as u16).to_be_bytes());
        p.extend_from_slice(&zlib);
        p
    }

    fn save_block(device: &mut EmuDevice) {
        let replies = device.request(&program_device(1, true, 10, 1)).unwrap();
        assert_eq!(replies, [ok(cmd::PROGRAM_DEVICE, 1)]);
        let replies = device.request(&program_block(2, 0, 10, &BLOCK)).unwrap();
        assert_eq!(replies, [ok(cmd::PROGRAM_BLOCK, 2)]);
        let replies = device.request(&[cmd::PROGRAM_COMPLETE, 3]).unwrap();
        assert_eq!(replies, [ok(cmd::PROGRAM_COMPLETE, 3)]);
    }

    #[test]
    fn test_startup_notice() {
        let mut device = EmuDevice::new();
        let sent = device.startup(false).unwrap();
        assert_eq!(sent, [vec![cmd::DEVICE_STARTUP, 1, 0, 0, 0, 0]]);
    }

    #[test]
    fn test_echo() {
        let mut device = EmuDevice::new();
        let payload = [cmd::ECHO, 7, 0xDE, 0xAD, 0xBE, 0xEF];
        assert_eq!(device.request(&payload).unwrap(), [payload.to_vec()]);
    }

    #[test]
    fn test_query_device() {
        let mut device = EmuDevice::new();
        let replies = device.request(&[cmd::QUERY_DEVICE, 4, 0]).unwrap();
        let mut expected = vec![cmd::QUERY_DEVICE, 4, 1, 0x43, 0x30, 0x11, 0x41];
        expected.extend_from_slice(&DEFAULT_UID);
        assert_eq!(replies, [expected]);
    }

    #[test]
    fn test_query_device_unsupported_part() {
        let mut device = EmuDevice::new();
        device.fpga_mut().set_id(0x4111_2043);
        let replies = device.request(&[cmd::QUERY_DEVICE, 4, 0]).unwrap();
        assert_eq!(replies[0][2], 0);
    }

    #[test]
    fn test_unknown_and_short_commands() {
        let mut device = EmuDevice::new();
        assert_eq!(device.request(&[0x42, 5]).unwrap(), [rejected(5)]);
        assert_eq!(device.request(&[cmd::QUERY_DEVICE, 6]).unwrap(), [rejected(6)]);
        assert_eq!(
            device.request(&[cmd::PROGRAM_DEVICE, 7, 1, 0]).unwrap(),
            [rejected(7)]
        );
    }

    #[test]
    fn test_bad_frame_ignored() {
        let mut device = EmuDevice::new();
        device.send_raw(&[0x00, 0x1B, 0x03, 0x00, cmd::ECHO, 1, 0x55]);
        device.pump();
        assert!(device.responses().is_empty());
        assert_eq!(device.request(&[cmd::ECHO, 2]).unwrap(), [vec![cmd::ECHO, 2]]);
    }

    #[test]
    fn test_program_and_save() {
        let mut device = EmuDevice::new();
        save_block(&mut device);

        assert_eq!(device.fpga().configured(), Some(&BLOCK[..]));
        assert!(!device.fpga().in_config_mode());
        assert!(!device.session_open());

        let replies = device.request(&[cmd::QUERY_BITSTREAM_FLASH, 9]).unwrap();
        let mut expected = vec![cmd::QUERY_BITSTREAM_FLASH, 9, 0, 0, 0, 0];
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&10u32.to_le_bytes());
        expected.push(55);
        assert_eq!(replies, [expected]);
    }

    #[test]
    fn test_program_without_save_leaves_flash_alone() {
        let mut device = EmuDevice::new();
        device.request(&program_device(1, false, 10, 1)).unwrap();
        device.request(&program_block(2, 0, 10, &BLOCK)).unwrap();
        device.request(&[cmd::PROGRAM_COMPLETE, 3]).unwrap();
        assert_eq!(device.fpga().configured(), Some(&BLOCK[..]));
        assert_eq!(device.flash().program_count(), 0);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut device = EmuDevice::new();
        device.request(&program_device(1, true, 11, 1)).unwrap();
        let replies = device.request(&program_block(2, 0, 11, &BLOCK)).unwrap();
        assert_eq!(replies, [rejected(2)]);
        assert!(device.fpga().bitstream().is_empty());
        assert_eq!(device.flash().program_count(), 0);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let mut device = EmuDevice::new();
        device.request(&program_device(1, false, 10, 1)).unwrap();
        let mut block = program_block(2, 0, 10, &BLOCK);
        block[8] ^= 0xFF;
        assert_eq!(device.request(&block).unwrap(), [rejected(2)]);
        assert!(device.fpga().bitstream().is_empty());
    }

    #[test]
    fn test_block_without_session() {
        let mut device = EmuDevice::new();
        let replies = device.request(&program_block(2, 0, 10, &BLOCK)).unwrap();
        assert_eq!(replies, [rejected(2)]);
        assert!(device.fpga().events().is_empty());
        assert_eq!(device.request(&[cmd::PROGRAM_COMPLETE, 3]).unwrap(), [rejected(3)]);
    }

    #[test]
    fn test_query_closes_open_session() {
        let mut device = EmuDevice::new();
        device.request(&program_device(1, false, 10, 1)).unwrap();
        assert!(device.session_open());
        device.fpga_mut().clear_log();

        let replies = device.request(&[cmd::QUERY_DEVICE, 2, 0]).unwrap();
        assert_eq!(replies.len(), 1);
        assert!(!device.session_open());
        assert!(!device.fpga().in_config_mode());

        let events = device.fpga().events();
        assert_eq!(
            events[..3],
            [FpgaEvent::BurstEnded(0), FpgaEvent::Deselect, FpgaEvent::Delay(100)]
        );
        let disable = events
            .iter()
            .position(|e| *e == FpgaEvent::Command(opcodes::ISC_DISABLE))
            .unwrap();
        let read_id = events
            .iter()
            .position(|e| *e == FpgaEvent::Command(opcodes::READ_ID))
            .unwrap();
        assert!(disable < read_id);
    }

    #[test]
    fn test_echo_keeps_session_open() {
        let mut device = EmuDevice::new();
        device.request(&program_device(1, false, 10, 1)).unwrap();
        device.request(&[cmd::ECHO, 2]).unwrap();
        assert!(device.session_open());
        assert!(device.fpga().in_config_mode());
    }

    #[test]
    fn test_busy_fpga_refuses_session() {
        let mut device = EmuDevice::new();
        device.fpga_mut().set_busy(true);
        let replies = device.request(&program_device(1, false, 10, 1)).unwrap();
        assert_eq!(replies, [vec![cmd::PROGRAM_DEVICE, 1, 1, 0, 0, 0]]);
        assert!(!device.session_open());
    }

    #[test]
    fn test_clear_then_query() {
        let mut device = EmuDevice::new();
        save_block(&mut device);
        assert_eq!(
            device.request(&[cmd::CLEAR_BITSTREAM_FLASH, 4]).unwrap(),
            [ok(cmd::CLEAR_BITSTREAM_FLASH, 4)]
        );
        let replies = device.request(&[cmd::QUERY_BITSTREAM_FLASH, 5]).unwrap();
        let mut expected = vec![cmd::QUERY_BITSTREAM_FLASH, 5, 1, 0, 0, 0];
        expected.extend_from_slice(&[0; 13]);
        assert_eq!(replies, [expected]);
    }

    #[test]
    fn test_program_from_flash_twice() {
        let mut device = EmuDevice::new();
        save_block(&mut device);
        device.fpga_mut().set_program_n(false);
        device.fpga_mut().set_program_n(true);
        device.fpga_mut().clear_log();

        for counter in [10, 11] {
            let replies = device
                .request(&[cmd::PROGRAM_BITSTREAM_FROM_FLASH, counter])
                .unwrap();
            assert_eq!(replies, [ok(cmd::PROGRAM_BITSTREAM_FROM_FLASH, counter)]);
        }
        assert_eq!(device.fpga().configured(), Some(&BLOCK[..]));
    }

    #[test]
    fn test_program_from_empty_flash() {
        let mut device = EmuDevice::new();
        let replies = device
            .request(&[cmd::PROGRAM_BITSTREAM_FROM_FLASH, 1])
            .unwrap();
        assert_eq!(replies, [vec![cmd::PROGRAM_BITSTREAM_FROM_FLASH, 1, 1, 0, 0, 0]]);
        assert!(!device.fpga().in_config_mode());
    }

    #[test]
    fn test_corrupt_block_not_programmed() {
        let mut device = EmuDevice::new();
        save_block(&mut device);
        let offset = StoreGeometry::default().block_offset(0) as usize;
        device.flash_mut().data_mut()[offset + 9] ^= 0x01;
        device.fpga_mut().clear_log();

        let replies = device
            .request(&[cmd::PROGRAM_BITSTREAM_FROM_FLASH, 1])
            .unwrap();
        assert_eq!(replies[0][2], 1);
        assert!(device.fpga().bitstream().is_empty());
    }

    #[test]
    fn test_startup_auto_program() {
        let geometry = StoreGeometry::default();
        let mut device = EmuDevice::new();
        save_block(&mut device);
        let flash = device.flash().clone();

        let mut rebooted =
            EmuDevice::with_parts(EmuFpga::default(), flash, EmuPlatform::default(), geometry);
        let sent = rebooted.startup(true).unwrap();
        assert_eq!(sent, [vec![cmd::DEVICE_STARTUP, 1, 0, 0, 0, 0]]);
        assert_eq!(rebooted.fpga().configured(), Some(&BLOCK[..]));
    }

    #[test]
    fn test_failed_block_store_skips_record() {
        let mut device = EmuDevice::new();
        let replies = device.request(&program_device(1, true, 20, 2)).unwrap();
        assert_eq!(replies, [ok(cmd::PROGRAM_DEVICE, 1)]);
        assert_eq!(device.session_persist(), Some(Persist::Enabled));

        device.flash_mut().set_fault(Some(Fault::ProgramFails));
        let replies = device.request(&program_block(2, 0, 10, &BLOCK)).unwrap();
        device.flash_mut().set_fault(None);
        assert_eq!(replies, [ok(cmd::PROGRAM_BLOCK, 2)]);
        assert_eq!(device.session_persist(), Some(Persist::SilentlyDisabled));

        // Later blocks still stream but are no longer stored
        let programs = device.flash().program_count();
        let replies = device.request(&program_block(3, 1, 10, &BLOCK)).unwrap();
        assert_eq!(replies, [ok(cmd::PROGRAM_BLOCK, 3)]);
        assert_eq!(device.session_persist(), Some(Persist::SilentlyDisabled));
        assert_eq!(device.flash().program_count(), programs);

        let replies = device.request(&[cmd::PROGRAM_COMPLETE, 4]).unwrap();
        assert_eq!(replies, [ok(cmd::PROGRAM_COMPLETE, 4)]);
        assert_eq!(device.fpga().configured(), Some(&[BLOCK, BLOCK].concat()[..]));
        assert_eq!(device.flash().program_count(), programs);

        let replies = device.request(&[cmd::QUERY_BITSTREAM_FLASH, 5]).unwrap();
        assert_eq!(replies[0][2], 1);
    }

    #[test]
    fn test_reboot_is_silent() {
        let mut device = EmuDevice::new();
        let replies = device.request(&[cmd::REBOOT_PROGRAMMER, 1]).unwrap();
        assert!(replies.is_empty());
        assert_eq!(device.platform().reboot_count(), 1);
    }
}
