use byteorder::{BigEndian, ByteOrder};

use crate::TRAILER_LEN;

/// The fixed 4-byte footer of a compressed blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Length of the decompressed data (24 bits).
    pub uncompressed_len: u32,
    /// Escape byte used by the payload.
    pub flag: u8,
}

impl Trailer {
    /// Read the trailer from the end of `blob`. Returns `None` if the blob is
    /// shorter than the trailer itself.
    pub fn read(blob: &[u8]) -> Option<Self> {
        let start = blob.len().checked_sub(TRAILER_LEN)?;
        let raw = &blob[start..];
        Some(Self {
            uncompressed_len: BigEndian::read_u24(&raw[..3]),
            flag: raw[3],
        })
    }

    /// Encode the trailer. The length is truncated to 24 bits.
    pub fn to_bytes(self) -> [u8; TRAILER_LEN] {
        let mut raw = [0u8; TRAILER_LEN];
        BigEndian::write_u24(&mut raw[..3], self.uncompressed_len & 0xFF_FFFF);
        raw[3] = self.flag;
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_layout() {
        let trailer = Trailer {
            uncompressed_len: 0x01_2C00,
            flag: 0x7F,
        };
        assert_eq!(trailer.to_bytes(), [0x01, 0x2C, 0x00, 0x7F]);
    }

    #[test]
    fn test_read_trailer() {
        let blob = [0xAA, 0xBB, 0x00, 0x01, 0x78, 0x00];
        let trailer = Trailer::read(&blob).unwrap();
        assert_eq!(trailer.uncompressed_len, 376);
        assert_eq!(trailer.flag, 0x00);
    }

    #[test]
    fn test_read_trailer_too_short() {
        assert!(Trailer::read(&[1, 2, 3]).is_none());
    }
}
