//! Programmer client
//!
//! This module provides the `Fabric` struct that speaks the programmer's
//! request/response protocol over any [`Transport`]. Every request carries
//! an incrementing counter, and every response is matched against the
//! command and counter that were sent.

use crate::error::{FabricError, Result};
use crate::transport::Transport;

use fabric_core::checksum::sum8;
use fabric_core::dispatch::REQUEST_BUFFER_LEN;
use fabric_core::fpga::DeviceId;
use fabric_core::protocol::{
    cmd, FlashQueryResponse, GenericResponse, PacketHeader, ProgramBlockRequest,
    ProgramDeviceRequest, QueryDeviceRequest, QueryDeviceResponse, BLOCK_SIZE_PREFIX_LEN,
    STATUS_ERROR, STATUS_OK,
};
use fabric_core::store::StoreGeometry;
use fabric_core::transport::{encode_frame, FrameDecoder};
use miniz_oxide::deflate::compress_to_vec_zlib;
use std::fmt;
use std::time::{Duration, Instant};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, IntoBytes};

/// Uncompressed bytes per ProgramBlock
pub const BLOCK_SIZE: usize = 4096 - 32;

/// Default response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u32 = 2500;

/// zlib level used for blocks
const COMPRESSION_LEVEL: u8 = 9;

/// Bytes requested from the transport per read
const READ_CHUNK: usize = 256;

/// Blocks the programmer's flash store can hold
pub fn max_saved_blocks() -> usize {
    StoreGeometry::default().max_blocks() as usize
}

/// Identity reported by QueryDevice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Attached FPGA is a supported part
    pub ready: bool,
    /// FPGA IDCODE
    pub fpga_id: DeviceId,
    /// Programmer board unique id
    pub uid: [u8; 8],
}

impl DeviceInfo {
    /// Unique id as a hex string
    pub fn uid_hex(&self) -> String {
        self.uid.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FPGA {} ({}), programmer {}",
            self.fpga_id,
            if self.ready { "ready" } else { "not supported" },
            self.uid_hex()
        )
    }
}

/// Bitstream stored in programmer flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashInfo {
    /// Loaded into the FPGA when the programmer starts
    pub program_on_startup: bool,
    /// Number of stored blocks
    pub block_count: u32,
    /// Uncompressed bitstream size
    pub bitstream_size: u32,
    /// Additive checksum of the whole bitstream
    pub checksum: u8,
}

/// Callback for progress reporting while programming
pub trait ProgramProgress {
    /// Called once before the first block
    fn started(&mut self, total_bytes: usize, blocks: usize);

    /// Called after each block is accepted
    fn block_sent(&mut self, bytes_sent: usize);

    /// Called after the device accepted the complete bitstream
    fn completed(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl ProgramProgress for NoProgress {
    fn started(&mut self, _total_bytes: usize, _blocks: usize) {}
    fn block_sent(&mut self, _bytes_sent: usize) {}
    fn completed(&mut self) {}
}

/// Compress one block the way the device expects it
///
/// The zlib stream is preceded by the raw size as a big-endian `u16`.
pub fn compress_block(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 + BLOCK_SIZE_PREFIX_LEN);
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(&compress_to_vec_zlib(data, COMPRESSION_LEVEL));
    out
}

/// Fabric programmer client
pub struct Fabric<T: Transport> {
    transport: T,
    counter: u8,
    timeout_ms: u32,
    decoder: FrameDecoder<REQUEST_BUFFER_LEN>,
}

impl<T: Transport> Fabric<T> {
    /// Create a client using the default response timeout
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            counter: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            decoder: FrameDecoder::new(),
        }
    }

    /// Change the response timeout
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the client and return the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Read the FPGA id and programmer uid
    pub fn query_device(&mut self) -> Result<DeviceInfo> {
        let request = QueryDeviceRequest {
            header: self.next_header(cmd::QUERY_DEVICE),
            reserved: 0,
        };
        let payload = self.transact(request.header, request.as_bytes())?;
        let (response, _) = QueryDeviceResponse::read_from_prefix(&payload).map_err(|_| {
            FabricError::ShortResponse {
                command: cmd::QUERY_DEVICE,
                len: payload.len(),
            }
        })?;
        Ok(DeviceInfo {
            ready: response.device_state == 1,
            fpga_id: DeviceId(response.fpga_device_id.get()),
            uid: response.programmer_uid,
        })
    }

    /// Stream a bitstream into the FPGA, optionally saving it to flash
    pub fn program(
        &mut self,
        bitstream: &[u8],
        save_to_flash: bool,
        progress: &mut impl ProgramProgress,
    ) -> Result<()> {
        let blocks = bitstream.len().div_ceil(BLOCK_SIZE);
        let total_size = u32::try_from(bitstream.len())
            .map_err(|_| FabricError::BitstreamTooLarge(bitstream.len()))?;
        if blocks > u16::MAX as usize + 1 {
            return Err(FabricError::BitstreamTooLarge(bitstream.len()));
        }
        // The device would load it but quietly skip saving
        if save_to_flash && blocks > max_saved_blocks() {
            return Err(FabricError::TooLargeToSave {
                blocks,
                max: max_saved_blocks(),
            });
        }

        let checksum = bitstream
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        let begin = ProgramDeviceRequest {
            header: self.next_header(cmd::PROGRAM_DEVICE),
            save_to_flash: save_to_flash as u8,
            total_size: U32::new(total_size),
            block_count: U32::new(blocks as u32),
            bitstream_checksum: U16::new(checksum),
        };
        log::debug!(
            "program: {} bytes in {} blocks, save {}",
            total_size,
            blocks,
            save_to_flash
        );
        self.transact_generic(begin.header, begin.as_bytes())?;

        progress.started(bitstream.len(), blocks);
        let mut sent = 0;
        for (block_id, block) in bitstream.chunks(BLOCK_SIZE).enumerate() {
            let packet = self.block_packet(block_id as u16, block)?;
            let header = PacketHeader::new(packet[0], packet[1]);
            self.transact_generic(header, &packet)?;
            sent += block.len();
            log::trace!("block {} accepted ({} bytes)", block_id, block.len());
            progress.block_sent(sent);
        }

        let complete = self.next_header(cmd::PROGRAM_COMPLETE);
        self.transact_generic(complete, complete.as_bytes())?;
        progress.completed();
        Ok(())
    }

    /// Describe the stored bitstream, `None` when there is no valid one
    pub fn query_flash(&mut self) -> Result<Option<FlashInfo>> {
        let header = self.next_header(cmd::QUERY_BITSTREAM_FLASH);
        let payload = self.transact(header, header.as_bytes())?;
        let (response, _) = FlashQueryResponse::read_from_prefix(&payload).map_err(|_| {
            FabricError::ShortResponse {
                command: header.command,
                len: payload.len(),
            }
        })?;
        if response.error_code.get() != STATUS_OK {
            return Ok(None);
        }
        Ok(Some(FlashInfo {
            program_on_startup: response.program_on_startup.get() != 0,
            block_count: response.block_count.get(),
            bitstream_size: response.bitstream_size.get(),
            checksum: response.checksum,
        }))
    }

    /// Load the FPGA from the stored bitstream
    pub fn program_from_flash(&mut self) -> Result<()> {
        let header = self.next_header(cmd::PROGRAM_BITSTREAM_FROM_FLASH);
        self.transact_generic(header, header.as_bytes())
    }

    /// Invalidate the stored bitstream
    pub fn clear_flash(&mut self) -> Result<()> {
        let header = self.next_header(cmd::CLEAR_BITSTREAM_FLASH);
        self.transact_generic(header, header.as_bytes())
    }

    /// Restart the programmer; it does not answer
    pub fn reboot(&mut self) -> Result<()> {
        let header = self.next_header(cmd::REBOOT_PROGRAMMER);
        self.send(header.as_bytes())
    }

    /// Send `data` in an Echo and return what came back
    pub fn echo(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let header = self.next_header(cmd::ECHO);
        let mut payload = header.as_bytes().to_vec();
        payload.extend_from_slice(data);
        let response = self.transact(header, &payload)?;
        Ok(response[2..].to_vec())
    }

    fn next_header(&mut self, command: u8) -> PacketHeader {
        self.counter = self.counter.wrapping_add(1);
        PacketHeader::new(command, self.counter)
    }

    fn block_packet(&mut self, block_id: u16, block: &[u8]) -> Result<Vec<u8>> {
        let compressed = compress_block(block);
        let compressed_len = u16::try_from(compressed.len())
            .map_err(|_| FabricError::BitstreamTooLarge(compressed.len()))?;
        let request = ProgramBlockRequest {
            header: self.next_header(cmd::PROGRAM_BLOCK),
            block_id: U16::new(block_id),
            compressed_block_size: U16::new(compressed_len),
            block_size: U16::new(block.len() as u16),
            block_checksum: sum8(block),
        };
        let mut packet = request.as_bytes().to_vec();
        packet.extend_from_slice(&compressed);
        Ok(packet)
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload)?;
        self.transport.discard_input()?;
        self.transport.write(&frame)?;
        self.transport.flush()
    }

    /// Wait for the next frame that is not a startup notice
    fn receive(&mut self, command: u8) -> Result<Vec<u8>> {
        self.decoder.reset();
        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms as u64);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let n = self
                .transport
                .read_nonblock(&mut chunk, remaining.as_millis().max(1) as u32)?;
            for &byte in &chunk[..n] {
                let Some(payload) = self.decoder.push(byte) else {
                    continue;
                };
                if payload.first() == Some(&cmd::DEVICE_STARTUP) {
                    log::debug!("ignoring device startup notice");
                    continue;
                }
                return Ok(payload.to_vec());
            }
            if n == 0 && Instant::now() >= deadline {
                return Err(FabricError::Timeout(command));
            }
        }
    }

    /// Send a request and return the matching response payload
    fn transact(&mut self, header: PacketHeader, payload: &[u8]) -> Result<Vec<u8>> {
        self.send(payload)?;
        let response = self.receive(header.command)?;
        check_header(header, &response)?;
        Ok(response)
    }

    fn transact_generic(&mut self, header: PacketHeader, payload: &[u8]) -> Result<()> {
        let response = self.transact(header, payload)?;
        let code = error_code(&response).ok_or(FabricError::ShortResponse {
            command: header.command,
            len: response.len(),
        })?;
        if code != STATUS_OK {
            return Err(FabricError::Device {
                command: header.command,
                code,
            });
        }
        Ok(())
    }
}

fn error_code(payload: &[u8]) -> Option<u32> {
    GenericResponse::read_from_prefix(payload)
        .ok()
        .map(|(response, _)| response.error_code.get())
}

fn check_header(sent: PacketHeader, payload: &[u8]) -> Result<()> {
    let (header, _) =
        PacketHeader::read_from_prefix(payload).map_err(|_| FabricError::ShortResponse {
            command: sent.command,
            len: payload.len(),
        })?;
    if header.command == cmd::ERROR {
        return Err(FabricError::Device {
            command: sent.command,
            code: error_code(payload).unwrap_or(STATUS_ERROR),
        });
    }
    if header.command != sent.command {
        return Err(FabricError::InvalidResponse {
            command: sent.command,
            response: header.command,
        });
    }
    if header.counter != sent.counter {
        return Err(FabricError::CounterMismatch {
            expected: sent.counter,
            actual: header.counter,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_emu::{EmuDevice, DEFAULT_UID};
    use std::collections::VecDeque;

    /// Connects a client to an emulated programmer
    struct Loopback {
        device: EmuDevice,
        rx: VecDeque<u8>,
        /// Bytes delivered ahead of the next response
        unsolicited: Vec<u8>,
        silent: bool,
    }

    impl Loopback {
        fn new(device: EmuDevice) -> Self {
            Self {
                device,
                rx: VecDeque::new(),
                unsolicited: Vec::new(),
                silent: false,
            }
        }
    }

    impl Transport for Loopback {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.device.send_raw(data);
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize> {
            self.device.pump();
            self.rx.extend(self.unsolicited.drain(..));
            let output = self.device.link_mut().take_output();
            if !self.silent {
                self.rx.extend(output);
            }
            let n = buf.len().min(self.rx.len());
            for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn discard_input(&mut self) -> Result<()> {
            self.rx.clear();
            Ok(())
        }
    }

    fn client() -> Fabric<Loopback> {
        Fabric::new(Loopback::new(EmuDevice::new()))
    }

    fn bitstream(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[derive(Default)]
    struct Recorder {
        total: usize,
        blocks: usize,
        sent: Vec<usize>,
        completed: bool,
    }

    impl ProgramProgress for Recorder {
        fn started(&mut self, total_bytes: usize, blocks: usize) {
            self.total = total_bytes;
            self.blocks = blocks;
        }

        fn block_sent(&mut self, bytes_sent: usize) {
            self.sent.push(bytes_sent);
        }

        fn completed(&mut self) {
            self.completed = true;
        }
    }

    #[test]
    fn test_query_device() {
        let mut fabric = client();
        let info = fabric.query_device().unwrap();
        assert!(info.ready);
        assert_eq!(info.fpga_id, DeviceId(0x4111_3043));
        assert_eq!(info.uid, DEFAULT_UID);
        assert_eq!(info.uid_hex(), "e6605838832f1a2b");
    }

    #[test]
    fn test_counter_increments() {
        let mut fabric = client();
        fabric.echo(&[]).unwrap();
        fabric.echo(&[]).unwrap();
        assert_eq!(fabric.counter, 2);
        fabric.counter = 0xFF;
        fabric.echo(&[1]).unwrap();
        assert_eq!(fabric.counter, 0);
    }

    #[test]
    fn test_echo() {
        let mut fabric = client();
        assert_eq!(fabric.echo(&[1, 2, 3]).unwrap(), [1, 2, 3]);
    }

    #[test]
    fn test_program_and_save() {
        let mut fabric = client();
        let data = bitstream(10_000);
        let mut progress = Recorder::default();
        fabric.program(&data, true, &mut progress).unwrap();

        assert_eq!(progress.total, 10_000);
        assert_eq!(progress.blocks, 3);
        assert_eq!(progress.sent, [BLOCK_SIZE, 2 * BLOCK_SIZE, 10_000]);
        assert!(progress.completed);

        let device = &fabric.transport().device;
        assert_eq!(device.fpga().configured(), Some(&data[..]));

        let stored = fabric.query_flash().unwrap().unwrap();
        assert_eq!(
            stored,
            FlashInfo {
                program_on_startup: true,
                block_count: 3,
                bitstream_size: 10_000,
                checksum: sum8(&data),
            }
        );
    }

    #[test]
    fn test_save_refused_when_store_too_small() {
        let mut fabric = client();
        let data = vec![0u8; BLOCK_SIZE * max_saved_blocks() + 1];
        let mut progress = Recorder::default();
        let err = fabric.program(&data, true, &mut progress).unwrap_err();
        assert!(matches!(
            err,
            FabricError::TooLargeToSave { blocks: 256, max: 255 }
        ));
        assert_eq!(progress.blocks, 0);
        assert_eq!(fabric.counter, 0);
        assert!(fabric.transport().device.fpga().events().is_empty());
    }

    #[test]
    fn test_program_without_save() {
        let mut fabric = client();
        fabric.program(&bitstream(100), false, &mut NoProgress).unwrap();
        assert_eq!(fabric.query_flash().unwrap(), None);
    }

    #[test]
    fn test_clear_flash() {
        let mut fabric = client();
        fabric.program(&bitstream(100), true, &mut NoProgress).unwrap();
        assert!(fabric.query_flash().unwrap().is_some());
        fabric.clear_flash().unwrap();
        assert_eq!(fabric.query_flash().unwrap(), None);
    }

    #[test]
    fn test_program_from_flash() {
        let mut fabric = client();
        let data = bitstream(5000);
        fabric.program(&data, true, &mut NoProgress).unwrap();
        fabric.transport_mut().device.fpga_mut().clear_log();

        fabric.program_from_flash().unwrap();
        assert_eq!(fabric.transport().device.fpga().bitstream(), &data[..]);
    }

    #[test]
    fn test_program_from_empty_flash_fails() {
        let mut fabric = client();
        assert!(matches!(
            fabric.program_from_flash(),
            Err(FabricError::Device { command: cmd::PROGRAM_BITSTREAM_FROM_FLASH, code: 1 })
        ));
    }

    #[test]
    fn test_busy_fpga_aborts_program() {
        let mut fabric = client();
        fabric.transport_mut().device.fpga_mut().set_busy(true);
        let mut progress = Recorder::default();
        let result = fabric.program(&bitstream(100), false, &mut progress);
        assert!(matches!(
            result,
            Err(FabricError::Device { command: cmd::PROGRAM_DEVICE, code: 1 })
        ));
        assert_eq!(progress.blocks, 0);
    }

    #[test]
    fn test_startup_notice_skipped() {
        let mut fabric = client();
        let notice = GenericResponse::new(PacketHeader::new(cmd::DEVICE_STARTUP, 1), STATUS_OK);
        fabric.transport_mut().unsolicited = encode_frame(notice.as_bytes()).unwrap();
        assert!(fabric.query_device().is_ok());
    }

    #[test]
    fn test_timeout() {
        let mut fabric = client();
        fabric.set_timeout(10);
        fabric.transport_mut().silent = true;
        assert!(matches!(
            fabric.query_device(),
            Err(FabricError::Timeout(cmd::QUERY_DEVICE))
        ));
    }

    #[test]
    fn test_reboot_does_not_wait() {
        let mut fabric = client();
        fabric.reboot().unwrap();
        let mut buf = [0u8; 8];
        fabric.transport_mut().read_nonblock(&mut buf, 0).unwrap();
        assert_eq!(fabric.transport().device.platform().reboot_count(), 1);
    }

    #[test]
    fn test_check_header() {
        let sent = PacketHeader::new(cmd::CLEAR_BITSTREAM_FLASH, 4);
        assert!(check_header(sent, &[cmd::CLEAR_BITSTREAM_FLASH, 4, 0, 0, 0, 0]).is_ok());
        assert!(matches!(
            check_header(sent, &[cmd::ERROR, 4, 1, 0, 0, 0]),
            Err(FabricError::Device { command: cmd::CLEAR_BITSTREAM_FLASH, code: 1 })
        ));
        assert!(matches!(
            check_header(sent, &[cmd::ECHO, 4]),
            Err(FabricError::InvalidResponse { .. })
        ));
        assert!(matches!(
            check_header(sent, &[cmd::CLEAR_BITSTREAM_FLASH, 5]),
            Err(FabricError::CounterMismatch { expected: 4, actual: 5 })
        ));
        assert!(matches!(
            check_header(sent, &[cmd::CLEAR_BITSTREAM_FLASH]),
            Err(FabricError::ShortResponse { .. })
        ));
    }

    #[test]
    fn test_compress_block_prefix() {
        let block = bitstream(BLOCK_SIZE);
        let compressed = compress_block(&block);
        assert_eq!(&compressed[..2], &(BLOCK_SIZE as u16).to_be_bytes());
        // zlib header
        assert_eq!(compressed[2], 0x78);
    }

    #[test]
    fn test_incompressible_block_fits_device_buffer() {
        let mut state = 0x1234_5678u32;
        let block: Vec<u8> = (0..BLOCK_SIZE)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let mut fabric = client();
        let packet = fabric.block_packet(0, &block).unwrap();
        assert!(packet.len() < REQUEST_BUFFER_LEN);
    }
}
