//! Device side framer over a [`SerialLink`]

use super::{frame_header, BYTE_TIMEOUT_MS, MAGIC};
use crate::checksum::{sum8, Checksum};
use crate::error::Result;
use crate::hal::SerialLink;
use maybe_async::maybe_async;

/// Sends and receives frames on a serial link
pub struct Framer<L> {
    link: L,
    byte_timeout_ms: u32,
}

impl<L> Framer<L> {
    /// Wrap a link using the default per-byte timeout
    pub fn new(link: L) -> Self {
        Self {
            link,
            byte_timeout_ms: BYTE_TIMEOUT_MS,
        }
    }

    /// Borrow the underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrow the underlying link
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Consume the framer and return the link
    pub fn into_inner(self) -> L {
        self.link
    }
}

#[maybe_async]
impl<L: SerialLink> Framer<L> {
    /// Send one payload as a frame
    ///
    /// Fails with [`crate::Error::PacketTooLarge`] before anything is written
    /// when the payload cannot be described by the length field.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let header = frame_header(payload.len())?;
        self.link.write(&header).await?;
        self.link.write(payload).await?;
        self.link.write(&[sum8(payload)]).await?;
        self.link.flush().await
    }

    /// Try to receive one frame into `buf`
    ///
    /// Returns immediately with `None` when no byte is pending or the pending
    /// byte is not the frame magic. Once a frame has started, each further
    /// byte is awaited for at most the per-byte timeout. The returned slice
    /// is the payload without its checksum.
    pub async fn receive<'b>(&mut self, buf: &'b mut [u8]) -> Option<&'b [u8]> {
        if self.link.try_read_byte().await? != MAGIC {
            return None;
        }

        let low = self.link.read_byte_timeout(self.byte_timeout_ms).await?;
        let high = self.link.read_byte_timeout(self.byte_timeout_ms).await?;
        let len = u16::from_le_bytes([low, high]) as usize;
        if len == 0 || len > buf.len() {
            log::warn!("dropping frame with length {}", len);
            return None;
        }

        let mut sum = Checksum::new();
        for slot in buf[..len].iter_mut() {
            let Some(byte) = self.link.read_byte_timeout(self.byte_timeout_ms).await else {
                log::warn!("frame timed out");
                return None;
            };
            *slot = byte;
        }

        let (payload, check) = buf[..len].split_at(len - 1);
        sum.update(payload);
        if sum.value() != check[0] {
            log::warn!(
                "dropping frame: checksum 0x{:02X}, expected 0x{:02X}",
                check[0],
                sum.value()
            );
            return None;
        }
        Some(payload)
    }
}
