//! Additive 8-bit checksum
//!
//! Frames, blocks and the stored bitstream all use the same check: the sum
//! of the bytes modulo 256. The host tooling computes exactly this, so it is
//! kept as is rather than replaced by a CRC.

/// Sum of `data` modulo 256
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Running additive checksum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum(u8);

impl Checksum {
    /// Start a new checksum at zero
    pub const fn new() -> Self {
        Self(0)
    }

    /// Add a slice of bytes
    pub fn update(&mut self, data: &[u8]) {
        self.0 = self.0.wrapping_add(sum8(data));
    }

    /// Add an already-computed partial sum
    pub fn add(&mut self, partial: u8) {
        self.0 = self.0.wrapping_add(partial);
    }

    /// Current value
    pub const fn value(&self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum8_wraps() {
        assert_eq!(sum8(&[]), 0);
        assert_eq!(sum8(&[1, 2, 3]), 6);
        assert_eq!(sum8(&[0xFF, 0x02]), 0x01);
        assert_eq!(sum8(&[0x80; 4]), 0x00);
    }

    #[test]
    fn test_running_matches_whole() {
        let data: [u8; 10] = [0x10, 0x20, 0x30, 0xF0, 0xE0, 0x01, 0x02, 0x03, 0x99, 0x77];
        let mut running = Checksum::new();
        running.update(&data[..3]);
        running.add(sum8(&data[3..7]));
        running.update(&data[7..]);
        assert_eq!(running.value(), sum8(&data));
    }
}
