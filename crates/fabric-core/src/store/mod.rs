//! Flash-resident bitstream store
//!
//! A reserved region of erase units holds one metadata record and one block
//! per unit. Blocks are written while a bitstream is streamed to the FPGA and
//! the record is written last, so an interrupted transfer leaves either the
//! previous record or one that fails verification.
//!
//! Nothing here does wear leveling. Every write is read back and compared.

mod layout;

pub use layout::{
    BitstreamRecord, BlockHeader, StoreGeometry, BLOCK_HEADER_LEN, ERASED, MAX_BLOCK_DATA,
    PAGE_SIZE, RECORD_LEN, RECORD_MAGIC, SECTOR_SIZE,
};

use crate::checksum::{sum8, Checksum};
use crate::error::{Error, FlashFailure, Result};
use crate::hal::FlashRegion;
use core::fmt;
use maybe_async::maybe_async;

const RECORD_OFFSET: u32 = 0;
const PAGE: usize = PAGE_SIZE as usize;

/// Why a stored bitstream failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// Record claims more blocks than the region holds
    TooManyBlocks {
        /// Stored count
        count: u32,
        /// Region capacity
        max: u32,
    },
    /// `checksum + 1` / `checksum + 2` fields do not agree
    DerivedChecksum,
    /// Stored block size does not fit its unit
    BlockTooLarge {
        /// Block index
        index: u32,
        /// Stored size
        size: u32,
    },
    /// Block header carries the wrong index
    BlockIdMismatch {
        /// Unit index
        index: u32,
        /// Index found in the header
        stored: u32,
    },
    /// Block bytes do not sum to the stored block checksum
    BlockChecksum {
        /// Block index
        index: u32,
        /// Stored checksum
        expected: u8,
        /// Computed checksum
        actual: u8,
    },
    /// Block checksums do not sum to the record checksum
    TotalChecksum {
        /// Record checksum
        expected: u8,
        /// Computed checksum
        actual: u8,
    },
    /// Reading the region failed
    Storage(Error),
}

impl From<Error> for VerifyError {
    fn from(e: Error) -> Self {
        VerifyError::Storage(e)
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyBlocks { count, max } => {
                write!(f, "block count {} exceeds capacity {}", count, max)
            }
            Self::DerivedChecksum => write!(f, "derived checksum fields do not match"),
            Self::BlockTooLarge { index, size } => {
                write!(f, "block {} size {} does not fit its unit", index, size)
            }
            Self::BlockIdMismatch { index, stored } => {
                write!(f, "unit {} holds block id {}", index, stored)
            }
            Self::BlockChecksum {
                index,
                expected,
                actual,
            } => write!(
                f,
                "block {} checksum 0x{:02X}, expected 0x{:02X}",
                index, actual, expected
            ),
            Self::TotalChecksum { expected, actual } => write!(
                f,
                "bitstream checksum 0x{:02X}, expected 0x{:02X}",
                actual, expected
            ),
            Self::Storage(e) => write!(f, "{}", e),
        }
    }
}

/// Bitstream store on top of a [`FlashRegion`]
pub struct BitstreamStore<F> {
    flash: F,
    geometry: StoreGeometry,
}

impl<F> BitstreamStore<F> {
    /// Create a store over `flash` using the given geometry
    pub fn new(flash: F, geometry: StoreGeometry) -> Self {
        Self { flash, geometry }
    }

    /// Region geometry
    pub fn geometry(&self) -> StoreGeometry {
        self.geometry
    }

    /// Borrow the flash region
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Mutably borrow the flash region
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }
}

#[maybe_async]
impl<F: FlashRegion> BitstreamStore<F> {
    /// Return the stored record if its magic is present
    ///
    /// A present record is not necessarily valid, see [`Self::verify`].
    pub async fn find_record(&mut self) -> Result<Option<BitstreamRecord>> {
        let mut bytes = [0u8; RECORD_LEN];
        self.read(RECORD_OFFSET, &mut bytes).await?;
        let record = BitstreamRecord::from_bytes(&bytes);
        Ok(record.is_present().then_some(record))
    }

    /// Persist `record`
    ///
    /// Does nothing when the stored bytes are already identical.
    pub async fn write_record(&mut self, record: &BitstreamRecord) -> Result<()> {
        let bytes = record.to_bytes();
        let mut stored = [0u8; RECORD_LEN];
        self.read(RECORD_OFFSET, &mut stored).await?;
        if stored == bytes {
            log::debug!("record unchanged, skipping write");
            return Ok(());
        }

        self.erase_unit(RECORD_OFFSET).await?;
        let mut page = [ERASED; PAGE];
        page[..RECORD_LEN].copy_from_slice(&bytes);
        self.program_page(RECORD_OFFSET, &page).await?;

        self.read(RECORD_OFFSET, &mut stored).await?;
        if stored != bytes {
            return Err(Error::Flash(FlashFailure::ReadBack {
                addr: RECORD_OFFSET,
            }));
        }
        Ok(())
    }

    /// Invalidate the stored bitstream by writing the all-zero record
    pub async fn clear(&mut self) -> Result<()> {
        self.write_record(&BitstreamRecord::cleared()).await
    }

    /// Store one block in its own unit
    ///
    /// The block checksum is added to `running` before anything is written,
    /// matching how the record checksum is later verified.
    pub async fn write_block(
        &mut self,
        block_id: u32,
        data: &[u8],
        running: &mut Checksum,
    ) -> Result<()> {
        if data.len() > MAX_BLOCK_DATA {
            return Err(Error::BlockTooLarge);
        }
        if block_id >= self.geometry.max_blocks() {
            return Err(Error::BlockOutOfRange);
        }

        let block_checksum = sum8(data);
        running.add(block_checksum);

        let header = BlockHeader {
            block_id,
            block_size: data.len() as u32,
            block_checksum,
        }
        .to_bytes();
        let parts: [&[u8]; 2] = [&header, data];
        let total = BLOCK_HEADER_LEN + data.len();
        let base = self.geometry.block_offset(block_id);

        self.erase_unit(base).await?;

        let mut page = [ERASED; PAGE];
        let mut offset = 0;
        while offset < total {
            gather(&parts, offset, &mut page);
            self.program_page(base + offset as u32, &page).await?;
            offset += PAGE;
        }

        // Read back in page sized pieces and compare with what was sent
        let mut expected = [ERASED; PAGE];
        let mut offset = 0;
        while offset < total {
            let len = PAGE.min(total - offset);
            gather(&parts, offset, &mut expected);
            self.read(base + offset as u32, &mut page[..len]).await?;
            if page[..len] != expected[..len] {
                log::warn!("block {} read-back mismatch", block_id);
                return Err(Error::Flash(FlashFailure::ReadBack { addr: base }));
            }
            offset += PAGE;
        }

        log::trace!(
            "stored block {} ({} bytes, checksum 0x{:02X})",
            block_id,
            data.len(),
            block_checksum
        );
        Ok(())
    }

    /// Read the header of the block stored under `index`
    pub async fn read_block_header(&mut self, index: u32) -> Result<BlockHeader> {
        if index >= self.geometry.max_blocks() {
            return Err(Error::BlockOutOfRange);
        }
        let mut bytes = [0u8; BLOCK_HEADER_LEN];
        self.read(self.geometry.block_offset(index), &mut bytes)
            .await?;
        Ok(BlockHeader::from_bytes(&bytes))
    }

    /// Read block bytes of `index` starting `offset` bytes past the header
    pub async fn read_block_chunk(&mut self, index: u32, offset: u32, buf: &mut [u8]) -> Result<()> {
        if index >= self.geometry.max_blocks() {
            return Err(Error::BlockOutOfRange);
        }
        if offset as usize + buf.len() > MAX_BLOCK_DATA {
            return Err(Error::BlockTooLarge);
        }
        let addr = self.geometry.block_offset(index) + BLOCK_HEADER_LEN as u32 + offset;
        self.read(addr, buf).await
    }

    /// Check that `record` describes a complete, intact bitstream
    pub async fn verify(&mut self, record: &BitstreamRecord) -> core::result::Result<(), VerifyError> {
        let max = self.geometry.max_blocks();
        if record.block_count > max {
            return Err(VerifyError::TooManyBlocks {
                count: record.block_count,
                max,
            });
        }
        if !record.derived_checksums_hold() {
            return Err(VerifyError::DerivedChecksum);
        }

        let mut total = Checksum::new();
        for index in 0..record.block_count {
            let header = self.read_block_header(index).await?;
            if header.block_size as usize > MAX_BLOCK_DATA {
                return Err(VerifyError::BlockTooLarge {
                    index,
                    size: header.block_size,
                });
            }
            if header.block_id != index {
                return Err(VerifyError::BlockIdMismatch {
                    index,
                    stored: header.block_id,
                });
            }

            let mut block = Checksum::new();
            let mut chunk = [0u8; PAGE];
            let mut offset = 0u32;
            while offset < header.block_size {
                let len = PAGE.min((header.block_size - offset) as usize);
                self.read_block_chunk(index, offset, &mut chunk[..len])
                    .await?;
                block.update(&chunk[..len]);
                offset += len as u32;
            }

            if block.value() != header.block_checksum {
                return Err(VerifyError::BlockChecksum {
                    index,
                    expected: header.block_checksum,
                    actual: block.value(),
                });
            }
            total.add(block.value());
        }

        if total.value() != record.checksum {
            return Err(VerifyError::TotalChecksum {
                expected: record.checksum,
                actual: total.value(),
            });
        }
        Ok(())
    }

    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.flash
            .read(addr, buf)
            .await
            .map_err(|_| Error::Flash(FlashFailure::Read { addr }))
    }

    async fn erase_unit(&mut self, addr: u32) -> Result<()> {
        self.flash
            .erase(addr, SECTOR_SIZE)
            .await
            .map_err(|_| Error::Flash(FlashFailure::Erase { addr }))
    }

    async fn program_page(&mut self, addr: u32, page: &[u8; PAGE]) -> Result<()> {
        self.flash
            .write(addr, page)
            .await
            .map_err(|_| Error::Flash(FlashFailure::Program { addr }))
    }
}

/// Copy the page starting at `offset` of the concatenation of `parts`
///
/// Bytes past the end are set to [`ERASED`].
fn gather(parts: &[&[u8]], offset: usize, page: &mut [u8; PAGE]) {
    page.fill(ERASED);
    let mut skip = offset;
    let mut filled = 0;
    for part in parts {
        if skip >= part.len() {
            skip -= part.len();
            continue;
        }
        let take = (part.len() - skip).min(PAGE - filled);
        page[filled..filled + take].copy_from_slice(&part[skip..skip + take]);
        filled += take;
        skip = 0;
        if filled == PAGE {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    /// NOR-like flash: erase sets 0xFF, program clears bits
    struct MockFlash {
        data: Vec<u8>,
        erases: usize,
        programs: usize,
        fail_program: bool,
    }

    impl MockFlash {
        fn new(units: u32) -> Self {
            Self {
                data: vec![ERASED; (units * SECTOR_SIZE) as usize],
                erases: 0,
                programs: 0,
                fail_program: false,
            }
        }
    }

    impl FlashRegion for MockFlash {
        fn size(&self) -> u32 {
            self.data.len() as u32
        }

        fn read(&mut self, addr: u32, buf: &mut [u8]) -> crate::Result<()> {
            let start = addr as usize;
            buf.copy_from_slice(&self.data[start..start + buf.len()]);
            Ok(())
        }

        fn erase(&mut self, addr: u32, len: u32) -> crate::Result<()> {
            self.erases += 1;
            let start = addr as usize;
            self.data[start..start + len as usize].fill(ERASED);
            Ok(())
        }

        fn write(&mut self, addr: u32, data: &[u8]) -> crate::Result<()> {
            self.programs += 1;
            if self.fail_program {
                return Ok(());
            }
            let start = addr as usize;
            for (dst, src) in self.data[start..start + data.len()].iter_mut().zip(data) {
                *dst &= *src;
            }
            Ok(())
        }
    }

    fn store(units: u32) -> BitstreamStore<MockFlash> {
        BitstreamStore::new(MockFlash::new(units), StoreGeometry { units })
    }

    fn store_bitstream(store: &mut BitstreamStore<MockFlash>, blocks: &[&[u8]]) -> BitstreamRecord {
        let mut running = Checksum::new();
        let mut total = 0;
        for (i, block) in blocks.iter().enumerate() {
            store.write_block(i as u32, block, &mut running).unwrap();
            total += block.len() as u32;
        }
        let record = BitstreamRecord::new(true, blocks.len() as u32, total, running.value());
        store.write_record(&record).unwrap();
        record
    }

    #[test]
    fn test_blank_region_has_no_record() {
        let mut store = store(4);
        assert_eq!(store.find_record().unwrap(), None);
    }

    #[test]
    fn test_write_then_find_record() {
        let mut store = store(4);
        let record = BitstreamRecord::new(false, 1, 10, 0x37);
        store.write_record(&record).unwrap();
        assert_eq!(store.find_record().unwrap(), Some(record));
        // Rest of page 0 stays erased
        assert!(store.flash().data[RECORD_LEN..PAGE].iter().all(|&b| b == ERASED));
    }

    #[test]
    fn test_identical_record_not_rewritten() {
        let mut store = store(4);
        let record = BitstreamRecord::new(true, 0, 0, 0);
        store.write_record(&record).unwrap();
        let (erases, programs) = (store.flash().erases, store.flash().programs);
        store.write_record(&record).unwrap();
        assert_eq!(store.flash().erases, erases);
        assert_eq!(store.flash().programs, programs);
    }

    #[test]
    fn test_record_read_back_failure() {
        let mut store = store(4);
        store.flash_mut().fail_program = true;
        let result = store.write_record(&BitstreamRecord::new(true, 0, 0, 0));
        assert_eq!(result, Err(Error::Flash(FlashFailure::ReadBack { addr: 0 })));
    }

    #[test]
    fn test_clear_hides_record() {
        let mut store = store(4);
        store_bitstream(&mut store, &[&[1, 2, 3]]);
        store.clear().unwrap();
        assert_eq!(store.find_record().unwrap(), None);
    }

    #[test]
    fn test_block_spanning_pages() {
        let mut store = store(4);
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let mut running = Checksum::new();
        store.write_block(1, &data, &mut running).unwrap();
        assert_eq!(running.value(), sum8(&data));

        let header = store.read_block_header(1).unwrap();
        assert_eq!(
            header,
            BlockHeader {
                block_id: 1,
                block_size: 1000,
                block_checksum: sum8(&data),
            }
        );
        let mut back = vec![0u8; 1000];
        store.read_block_chunk(1, 0, &mut back).unwrap();
        assert_eq!(back, data);
        // 1009 bytes need 4 pages
        assert_eq!(store.flash().programs, 4);
    }

    #[test]
    fn test_block_bounds() {
        let mut store = store(4);
        let mut running = Checksum::new();
        let big = vec![0u8; MAX_BLOCK_DATA + 1];
        assert_eq!(store.write_block(0, &big, &mut running), Err(Error::BlockTooLarge));
        assert_eq!(store.write_block(3, &[1], &mut running), Err(Error::BlockOutOfRange));
        let full = vec![0xA5u8; MAX_BLOCK_DATA];
        store.write_block(2, &full, &mut running).unwrap();
    }

    #[test]
    fn test_block_read_back_failure() {
        let mut store = store(4);
        store.flash_mut().fail_program = true;
        let mut running = Checksum::new();
        assert_eq!(
            store.write_block(0, &[1, 2, 3], &mut running),
            Err(Error::Flash(FlashFailure::ReadBack { addr: SECTOR_SIZE }))
        );
    }

    #[test]
    fn test_verify_valid_bitstream() {
        let mut store = store(8);
        let record = store_bitstream(&mut store, &[&[0xFF; 300], &[1, 2, 3, 4], &[0x80; 17]]);
        assert_eq!(store.verify(&record), Ok(()));
    }

    #[test]
    fn test_verify_rejects_block_count_overflow() {
        let mut store = store(4);
        let record = BitstreamRecord::new(false, 4, 0, 0);
        assert_eq!(
            store.verify(&record),
            Err(VerifyError::TooManyBlocks { count: 4, max: 3 })
        );
    }

    #[test]
    fn test_verify_rejects_derived_checksums() {
        let mut store = store(4);
        let mut record = store_bitstream(&mut store, &[&[5, 6]]);
        record.checksum_plus2 = record.checksum_plus2.wrapping_add(1);
        assert_eq!(store.verify(&record), Err(VerifyError::DerivedChecksum));
    }

    #[test]
    fn test_verify_rejects_corrupt_block() {
        let mut store = store(4);
        let record = store_bitstream(&mut store, &[&[0x10, 0x20], &[0x30]]);
        // Clear a bit of the first data byte of block 1
        let addr = (2 * SECTOR_SIZE) as usize + BLOCK_HEADER_LEN;
        store.flash_mut().data[addr] &= 0x0F;
        assert_eq!(
            store.verify(&record),
            Err(VerifyError::BlockChecksum {
                index: 1,
                expected: 0x30,
                actual: 0x00,
            })
        );
    }

    #[test]
    fn test_verify_rejects_wrong_block_id() {
        let mut store = store(4);
        let record = store_bitstream(&mut store, &[&[9]]);
        store.flash_mut().data[SECTOR_SIZE as usize] = 5;
        assert_eq!(
            store.verify(&record),
            Err(VerifyError::BlockIdMismatch { index: 0, stored: 5 })
        );
    }

    #[test]
    fn test_verify_rejects_missing_block() {
        let mut store = store(4);
        let mut running = Checksum::new();
        store.write_block(1, &[9], &mut running).unwrap();
        let record = BitstreamRecord::new(false, 1, 1, running.value());
        // unit for block 0 is still erased
        assert_eq!(
            store.verify(&record),
            Err(VerifyError::BlockTooLarge {
                index: 0,
                size: u32::MAX,
            })
        );
    }

    #[test]
    fn test_verify_rejects_total_checksum() {
        let mut store = store(4);
        let mut record = store_bitstream(&mut store, &[&[1, 1]]);
        record.checksum = 0x10;
        record.checksum_plus1 = 0x11;
        record.checksum_plus2 = 0x12;
        assert_eq!(
            store.verify(&record),
            Err(VerifyError::TotalChecksum {
                expected: 0x10,
                actual: 0x02,
            })
        );
    }

    #[test]
    fn test_gather_pads() {
        let mut page = [0u8; PAGE];
        gather(&[&[1, 2], &[3]], 1, &mut page);
        assert_eq!(&page[..3], &[2, 3, ERASED]);
        gather(&[&[1, 2], &[3]], 300, &mut page);
        assert!(page.iter().all(|&b| b == ERASED));
    }
}
