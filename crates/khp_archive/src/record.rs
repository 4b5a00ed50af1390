use binrw::binrw;

/// Size of one record on disk.
pub const RECORD_SIZE: u64 = 16;

/// Flag bit marking a record whose stored bytes are codec-compressed.
pub const COMPRESSED_FLAG: u32 = 0x01;

/// One entry of the archive record table.
///
/// `block` counts fixed-size blocks from the base of the data region, and `size`
/// is the number of stored bytes (the compressed size for compressed entries).
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveRecord {
    pub hash: u32,
    pub flags: u32,
    pub block: u32,
    pub size: u32,
}

impl ArchiveRecord {
    pub fn new(hash: u32, flags: u32, block: u32, size: u32) -> Self {
        Self {
            hash,
            flags,
            block,
            size,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & COMPRESSED_FLAG != 0
    }

    /// Padding slots carry a zero hash and are never part of a table's contents.
    pub fn is_padding(&self) -> bool {
        self.hash == 0
    }

    /// Byte offset of the record relative to the data region base.
    pub fn relative_offset(&self, block_size: u32) -> u64 {
        self.block as u64 * block_size as u64
    }

    /// A copy of this record describing the same bytes under another hash.
    pub fn alias(&self, hash: u32) -> Self {
        Self { hash, ..*self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::{BinRead, BinWrite};
    use std::io::Cursor;

    #[test]
    fn test_record_layout() {
        let record = ArchiveRecord::new(0x0393eba4, 1, 0x10, 0x800);
        let mut cursor = Cursor::new(Vec::new());
        record.write(&mut cursor).unwrap();

        assert_eq!(
            cursor.get_ref().as_slice(),
            &[
                0xa4, 0xeb, 0x93, 0x03, 0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x08,
                0x00, 0x00
            ]
        );

        cursor.set_position(0);
        assert_eq!(ArchiveRecord::read(&mut cursor).unwrap(), record);
    }

    #[test]
    fn test_alias_keeps_location() {
        let record = ArchiveRecord::new(0xA, 1, 7, 300);
        let alias = record.alias(0xC);
        assert_eq!(alias, ArchiveRecord::new(0xC, 1, 7, 300));
        assert!(alias.is_compressed());
    }

    #[test]
    fn test_relative_offset() {
        assert_eq!(ArchiveRecord::new(1, 0, 10, 0).relative_offset(2048), 20480);
    }
}
