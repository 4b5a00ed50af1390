use crate::error::PatchError;
use binrw::binrw;
use std::fmt::Display;
use std::ops::Range;

/// Flag bit of a classic record, and attribute bit of an extended record.
pub const COMPRESSED_BIT: u32 = 0x01;
/// Attribute bit marking an entry absent from the base archive.
pub const NEW_ENTRY_BIT: u32 = 0x02;
const PARENT_SHIFT: u32 = 8;

/// The archive a record belongs to.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default)]
pub enum ParentStore {
    /// The hash-indexed archive the rebuild works on.
    #[default]
    Primary = 0,
    /// The outer container's own file system.
    Container = 1,
}

/// On-disk record layout of a package, selected by the top byte of the version marker.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum LayoutRevision {
    /// 16-byte `{hash, flags, offset, size}` records.
    #[default]
    Classic = 0,
    /// 20-byte records with sizes, attributes and a metadata block.
    Extended = 1,
}

/// A logical package record, independent of the on-disk revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRecord {
    pub hash: u32,
    pub parent: ParentStore,
    /// Absolute payload offset in the package. Zero for relinks.
    pub data_offset: u32,
    /// Stored payload size.
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub relink_target: Option<u32>,
    pub compressed: bool,
    pub is_new: bool,
}

impl PatchRecord {
    pub fn is_relink(&self) -> bool {
        self.relink_target.is_some()
    }

    /// Byte range of the payload in the package, `None` for relinks.
    pub fn backing_range(&self) -> Option<Range<u64>> {
        if self.is_relink() {
            return None;
        }
        let start = self.data_offset as u64;
        Some(start..start + self.compressed_size as u64)
    }
}

/// Classic record as stored on disk.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClassicRecord {
    pub hash: u32,
    pub flags: u32,
    pub offset: u32,
    /// Payload size, or the relink target when `offset` is zero.
    pub size: u32,
}

/// Extended record as stored on disk.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExtendedRecord {
    pub hash: u32,
    pub offset: u32,
    /// Stored size, or the relink target when `offset` is zero.
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub attributes: u32,
}

impl LayoutRevision {
    pub fn record_size(self) -> u64 {
        match self {
            LayoutRevision::Classic => 16,
            LayoutRevision::Extended => 20,
        }
    }
}

impl ExtendedRecord {
    pub fn attributes_for(record: &PatchRecord) -> u32 {
        let mut attributes = (record.parent as u32) << PARENT_SHIFT;
        if record.compressed {
            attributes |= COMPRESSED_BIT;
        }
        if record.is_new {
            attributes |= NEW_ENTRY_BIT;
        }
        attributes
    }

    pub fn parent(&self) -> Result<ParentStore, PatchError> {
        ParentStore::try_from(((self.attributes >> PARENT_SHIFT) & 0xFF) as u8).map_err(|_| {
            PatchError::CorruptTable(format!(
                "record {:08x} names unknown parent store {}",
                self.hash,
                (self.attributes >> PARENT_SHIFT) & 0xFF
            ))
        })
    }
}

impl TryFrom<u8> for ParentStore {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ParentStore::Primary,
            1 => ParentStore::Container,
            _ => return Err(value),
        })
    }
}

impl TryFrom<u8> for LayoutRevision {
    type Error = PatchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => LayoutRevision::Classic,
            1 => LayoutRevision::Extended,
            _ => {
                return Err(PatchError::InvalidFormat(format!(
                    "unknown layout revision {}",
                    value
                )))
            }
        })
    }
}

impl Display for ParentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ParentStore::Primary => "primary",
            ParentStore::Container => "container",
        })
    }
}

impl Display for LayoutRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LayoutRevision::Classic => "classic",
            LayoutRevision::Extended => "extended",
        })
    }
}
