//! Command dispatcher
//!
//! Owns every device resource and serves host requests one at a time:
//! receive a frame, decode it, run the command to completion, reply, then
//! perform any flash work that was deferred until after the reply.
//!
//! A programming session is opened by ProgramDevice and closed by
//! ProgramComplete. Any other command except Echo closes an open session
//! first, leaving the FPGA out of configuration mode.

mod session;

pub use session::{Persist, ProgrammingSession, SessionState};

use crate::checksum::sum8;
use crate::codec::Inflater;
use crate::error::{Error, Result};
use crate::fpga::Ecp5;
use crate::hal::{FlashRegion, FpgaBus, Platform, SerialLink};
use crate::protocol::{
    cmd, FlashQueryResponse, GenericResponse, PacketHeader, ProgramBlock, QueryDeviceResponse,
    Request, MAX_RESPONSE_LEN, STATUS_ERROR, STATUS_OK,
};
use crate::store::{BitstreamRecord, BitstreamStore, MAX_BLOCK_DATA};
use crate::transport::Framer;
use maybe_async::maybe_async;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{Immutable, IntoBytes};

/// Size of the request receive buffer
pub const REQUEST_BUFFER_LEN: usize = 4096;

/// Size of the buffer blocks are inflated into
pub const SCRATCH_LEN: usize = 4096;

/// Response produced by a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing is sent
    Silent,
    /// The request payload is sent back unchanged
    Echo,
    /// A fixed-layout response
    Packet(heapless::Vec<u8, MAX_RESPONSE_LEN>),
}

impl Reply {
    fn packet<T: IntoBytes + Immutable>(response: &T) -> Self {
        // Every response layout fits MAX_RESPONSE_LEN
        Reply::Packet(heapless::Vec::from_slice(response.as_bytes()).unwrap_or_default())
    }

    fn generic(header: PacketHeader, error_code: u32) -> Self {
        Self::packet(&GenericResponse::new(header, error_code))
    }

    fn status(header: PacketHeader, ok: bool) -> Self {
        Self::generic(header, if ok { STATUS_OK } else { STATUS_ERROR })
    }

    fn rejected(header: PacketHeader) -> Self {
        Self::generic(header.to_error(), STATUS_ERROR)
    }
}

/// Flash work performed after the reply has been sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    Nothing,
    /// Store the block currently held in the scratch buffer
    StoreBlock { block_id: u32, len: usize },
    /// Commit the record of a completed session
    CommitRecord(BitstreamRecord),
}

/// Device resources and the session slot
pub struct Programmer<B, F, P> {
    fpga: Ecp5<B>,
    store: BitstreamStore<F>,
    platform: P,
    session: SessionState,
    inflater: Inflater,
    scratch: [u8; SCRATCH_LEN],
    deferred: Deferred,
}

impl<B, F, P> Programmer<B, F, P> {
    /// Bundle the device resources
    pub fn new(fpga: Ecp5<B>, store: BitstreamStore<F>, platform: P) -> Self {
        Self {
            fpga,
            store,
            platform,
            session: SessionState::Idle,
            inflater: Inflater::new(),
            scratch: [0; SCRATCH_LEN],
            deferred: Deferred::Nothing,
        }
    }

    /// Current session state
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// FPGA sequencer
    pub fn fpga(&self) -> &Ecp5<B> {
        &self.fpga
    }

    /// Mutable FPGA sequencer
    pub fn fpga_mut(&mut self) -> &mut Ecp5<B> {
        &mut self.fpga
    }

    /// Bitstream store
    pub fn store(&self) -> &BitstreamStore<F> {
        &self.store
    }

    /// Mutable bitstream store
    pub fn store_mut(&mut self) -> &mut BitstreamStore<F> {
        &mut self.store
    }

    /// Board services
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutable board services
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }
}

#[maybe_async]
impl<B: FpgaBus, F: FlashRegion, P: Platform> Programmer<B, F, P> {
    /// Run one decoded request
    pub async fn handle(&mut self, header: PacketHeader, request: Request<'_>) -> Reply {
        match request {
            Request::Echo(_) => Reply::Echo,
            Request::QueryDevice => {
                self.force_close().await;
                self.query_device(header).await
            }
            Request::ProgramDevice {
                save_to_flash,
                total_size,
                block_count,
            } => {
                self.force_close().await;
                let opened = self.open_session(save_to_flash, total_size, block_count).await;
                Reply::status(header, opened)
            }
            Request::ProgramBlock(block) => match self.program_block(&block).await {
                Ok(()) => Reply::status(header, true),
                Err(e) => {
                    log::warn!("block {} rejected: {}", block.block_id, e);
                    Reply::rejected(header)
                }
            },
            Request::ProgramComplete => match self.complete_session().await {
                Ok(ok) => Reply::status(header, ok),
                Err(e) => {
                    log::warn!("program complete rejected: {}", e);
                    Reply::rejected(header)
                }
            },
            Request::QueryBitstreamFlash => {
                self.force_close().await;
                let response = match self.valid_record().await {
                    Ok(record) => FlashQueryResponse {
                        header,
                        error_code: U32::new(STATUS_OK),
                        program_on_startup: U32::new(record.program_on_startup),
                        block_count: U32::new(record.block_count),
                        bitstream_size: U32::new(record.total_size),
                        checksum: record.checksum,
                    },
                    Err(e) => {
                        log::debug!("no valid stored bitstream: {}", e);
                        FlashQueryResponse::invalid(header)
                    }
                };
                Reply::packet(&response)
            }
            Request::ProgramBitstreamFromFlash => {
                self.force_close().await;
                let result = self.auto_program(true).await;
                if let Err(e) = result {
                    log::warn!("programming from flash failed: {}", e);
                }
                Reply::status(header, result.is_ok())
            }
            Request::ClearBitstreamFlash => {
                self.force_close().await;
                let result = self.store.clear().await;
                if let Err(e) = result {
                    log::warn!("clearing stored bitstream failed: {}", e);
                }
                Reply::status(header, result.is_ok())
            }
            Request::RebootProgrammer => {
                log::info!("rebooting");
                self.platform.reboot();
                Reply::Silent
            }
            Request::Malformed(command) => {
                log::warn!("payload too short for command 0x{:02X}", command);
                Reply::rejected(header)
            }
            Request::Unknown(command) => {
                log::warn!("unknown command 0x{:02X}", command);
                Reply::rejected(header)
            }
        }
    }

    /// Perform flash work queued by the last command
    pub async fn run_deferred(&mut self) {
        match core::mem::replace(&mut self.deferred, Deferred::Nothing) {
            Deferred::Nothing => {}
            Deferred::StoreBlock { block_id, len } => {
                let SessionState::Open(session) = &mut self.session else {
                    return;
                };
                let stored = self
                    .store
                    .write_block(block_id, &self.scratch[..len], &mut session.running_checksum)
                    .await;
                if let Err(e) = stored {
                    log::warn!("saving block {} failed: {}; bitstream will not be saved", block_id, e);
                    session.persist = Persist::SilentlyDisabled;
                }
            }
            Deferred::CommitRecord(record) => {
                if let Err(e) = self.store.write_record(&record).await {
                    log::warn!("saving bitstream record failed: {}", e);
                } else {
                    log::info!(
                        "saved bitstream: {} blocks, {} bytes",
                        record.block_count,
                        record.total_size
                    );
                }
            }
        }
    }

    /// Program the FPGA from the stored bitstream
    ///
    /// Without `force` the stored record must also be marked for programming
    /// at startup. Each block is re-checked while streaming; a failure ends
    /// the burst and leaves configuration mode before returning.
    pub async fn auto_program(&mut self, force: bool) -> Result<()> {
        let record = self.valid_record().await?;
        if record.program_on_startup == 0 && !force {
            return Err(Error::NotScheduled);
        }
        if self.fpga.poll_busy().await? {
            return Err(Error::FpgaBusy);
        }

        self.fpga.enable_config_mode().await?;
        self.fpga.begin_bitstream_write().await?;
        if let Err(e) = self.stream_stored_blocks(record.block_count).await {
            let _ = self.fpga.abort_configuration().await;
            return Err(e);
        }
        self.fpga.end_bitstream_write().await;

        if self.fpga.finish_configuration().await? {
            log::warn!("FPGA still busy after programming from flash");
        }
        log::info!("programmed {} bytes from flash", record.total_size);
        Ok(())
    }

    async fn stream_stored_blocks(&mut self, block_count: u32) -> Result<()> {
        for index in 0..block_count {
            let header = self.store.read_block_header(index).await?;
            let len = header.block_size as usize;
            if len > MAX_BLOCK_DATA {
                return Err(Error::BlockTooLarge);
            }
            if header.block_id != index {
                return Err(Error::NoStoredBitstream);
            }
            let data = &mut self.scratch[..len];
            self.store.read_block_chunk(index, 0, data).await?;
            let actual = sum8(data);
            if actual != header.block_checksum {
                return Err(Error::ChecksumMismatch {
                    expected: header.block_checksum,
                    actual,
                });
            }
            self.fpga.write_bitstream_block(data).await?;
            log::trace!("streamed stored block {} ({} bytes)", index, len);
        }
        Ok(())
    }

    async fn valid_record(&mut self) -> Result<BitstreamRecord> {
        let record = self
            .store
            .find_record()
            .await?
            .ok_or(Error::NoStoredBitstream)?;
        match self.store.verify(&record).await {
            Ok(()) => Ok(record),
            Err(crate::store::VerifyError::Storage(e)) => Err(e),
            Err(e) => {
                log::warn!("stored bitstream invalid: {}", e);
                Err(Error::NoStoredBitstream)
            }
        }
    }

    /// Abandon an open session
    async fn force_close(&mut self) {
        if self.session.take().is_some() {
            log::debug!("closing abandoned programming session");
            if let Err(e) = self.fpga.abort_configuration().await {
                log::warn!("leaving configuration mode failed: {}", e);
            }
        }
    }

    async fn query_device(&mut self, header: PacketHeader) -> Reply {
        let id = match self.fpga.read_id().await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("reading FPGA id failed: {}", e);
                return Reply::rejected(header);
            }
        };
        log::debug!("FPGA {}", id);
        Reply::packet(&QueryDeviceResponse {
            header,
            device_state: id.is_supported() as u8,
            fpga_device_id: U32::new(id.0),
            programmer_uid: self.platform.unique_id(),
        })
    }

    async fn open_session(&mut self, save_to_flash: bool, total_size: u32, block_count: u32) -> bool {
        log::debug!(
            "program device: {} bytes in {} blocks, save {}",
            total_size,
            block_count,
            save_to_flash
        );
        match self.fpga.poll_busy().await {
            Ok(false) => {}
            Ok(true) => {
                log::warn!("FPGA busy, not starting session");
                return false;
            }
            Err(e) => {
                log::warn!("busy check failed: {}", e);
                return false;
            }
        }

        let started = match self.fpga.enable_config_mode().await {
            Ok(()) => self.fpga.begin_bitstream_write().await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            log::warn!("entering configuration mode failed: {}", e);
            let _ = self.fpga.abort_configuration().await;
            return false;
        }

        self.session =
            SessionState::Open(ProgrammingSession::new(save_to_flash, block_count, total_size));
        true
    }

    async fn program_block(&mut self, block: &ProgramBlock<'_>) -> Result<()> {
        let persist = match &self.session {
            SessionState::Open(session) => session.persist,
            SessionState::Idle => return Err(Error::NoSession),
        };

        let len = self.inflater.inflate(block.zlib, &mut self.scratch)?;
        if len != block.block_size as usize {
            return Err(Error::SizeMismatch {
                expected: block.block_size as u32,
                actual: len as u32,
            });
        }
        let data = &self.scratch[..len];
        let actual = sum8(data);
        if actual != block.block_checksum {
            return Err(Error::ChecksumMismatch {
                expected: block.block_checksum,
                actual,
            });
        }

        self.fpga.write_bitstream_block(data).await?;
        log::trace!("block {} streamed ({} bytes)", block.block_id, len);

        if persist == Persist::Enabled {
            self.deferred = Deferred::StoreBlock {
                block_id: block.block_id as u32,
                len,
            };
        }
        Ok(())
    }

    /// Close the session; `Ok(false)` when the FPGA stayed busy
    async fn complete_session(&mut self) -> Result<bool> {
        let session = self.session.take().ok_or(Error::NoSession)?;
        self.fpga.end_bitstream_write().await;
        let busy = match self.fpga.finish_configuration().await {
            Ok(busy) => busy,
            Err(e) => {
                log::warn!("leaving configuration mode failed: {}", e);
                true
            }
        };
        if busy {
            log::warn!("FPGA busy after bitstream");
            return Ok(false);
        }
        if session.persist == Persist::Enabled {
            self.deferred = Deferred::CommitRecord(session.record());
        }
        Ok(true)
    }
}

/// Serves host requests over a serial link
pub struct Dispatcher<L, B, F, P> {
    framer: Framer<L>,
    request: [u8; REQUEST_BUFFER_LEN],
    programmer: Programmer<B, F, P>,
}

impl<L, B, F, P> Dispatcher<L, B, F, P> {
    /// Create a dispatcher
    pub fn new(link: L, fpga: Ecp5<B>, store: BitstreamStore<F>, platform: P) -> Self {
        Self {
            framer: Framer::new(link),
            request: [0; REQUEST_BUFFER_LEN],
            programmer: Programmer::new(fpga, store, platform),
        }
    }

    /// Serial framer
    pub fn framer(&self) -> &Framer<L> {
        &self.framer
    }

    /// Mutable serial framer
    pub fn framer_mut(&mut self) -> &mut Framer<L> {
        &mut self.framer
    }

    /// Device resources
    pub fn programmer(&self) -> &Programmer<B, F, P> {
        &self.programmer
    }

    /// Mutable device resources
    pub fn programmer_mut(&mut self) -> &mut Programmer<B, F, P> {
        &mut self.programmer
    }
}

#[maybe_async]
impl<L, B, F, P> Dispatcher<L, B, F, P>
where
    L: SerialLink,
    B: FpgaBus,
    F: FlashRegion,
    P: Platform,
{
    /// Announce the device to the host, optionally programming from flash first
    pub async fn startup(&mut self, auto_program: bool) -> Result<()> {
        if auto_program {
            match self.programmer.auto_program(false).await {
                Ok(()) => log::info!("FPGA programmed from flash at startup"),
                Err(e) => log::info!("no startup programming: {}", e),
            }
        }
        let notice = GenericResponse::new(PacketHeader::new(cmd::DEVICE_STARTUP, 1), STATUS_OK);
        self.framer.send(notice.as_bytes()).await
    }

    /// Serve at most one request
    ///
    /// Returns `false` when no frame was pending.
    pub async fn poll(&mut self) -> bool {
        let Some(payload) = self.framer.receive(&mut self.request).await else {
            return false;
        };
        let Some((header, request)) = Request::parse(payload) else {
            log::warn!("dropping {} byte payload without header", payload.len());
            return true;
        };
        log::debug!(
            "command 0x{:02X} counter {}",
            header.command,
            header.counter
        );

        let reply = self.programmer.handle(header, request).await;
        let sent = match &reply {
            Reply::Silent => Ok(()),
            Reply::Echo => self.framer.send(payload).await,
            Reply::Packet(bytes) => self.framer.send(bytes).await,
        };
        if let Err(e) = sent {
            log::warn!("sending response failed: {}", e);
        }

        self.programmer.run_deferred().await;
        true
    }
}
