//! Discovery of the data region and the record table inside a container.

use crate::error::{ArchiveError, Result};
use crate::layout::ContainerLayout;
use crate::record::RECORD_SIZE;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Where the archive lives inside its container. All values are absolute bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerOffsets {
    pub data_offset: u64,
    pub table_offset: u64,
    pub table_size: u64,
}

/// Finds the [`ContainerOffsets`] of a container.
///
/// A directory-tree parser for the outer file system plugs in here; this crate
/// ships explicit offsets and a signature scan.
pub trait OffsetLocator {
    fn locate<R: Read + Seek>(
        &self,
        reader: &mut R,
        layout: &ContainerLayout,
    ) -> Result<ContainerOffsets>;
}

/// Offsets known in advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedOffsets(pub ContainerOffsets);

impl OffsetLocator for FixedOffsets {
    fn locate<R: Read + Seek>(
        &self,
        _reader: &mut R,
        _layout: &ContainerLayout,
    ) -> Result<ContainerOffsets> {
        Ok(self.0)
    }
}

/// Probes block starts for the layout's data and table signatures.
///
/// The data region is the first block starting with `data_signature`. The table
/// is the first block at or after it starting with `table_signature`; its size
/// is read from the record the table keeps for itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureScan;

impl OffsetLocator for SignatureScan {
    fn locate<R: Read + Seek>(
        &self,
        reader: &mut R,
        layout: &ContainerLayout,
    ) -> Result<ContainerOffsets> {
        let len = reader.seek(SeekFrom::End(0))?;
        let block_size = layout.block_size as u64;

        let data_offset = scan_blocks(reader, 0, len, block_size, layout.data_signature)?
            .ok_or(ArchiveError::OffsetsNotFound("data region"))?;
        let table_offset =
            scan_blocks(reader, data_offset, len, block_size, layout.table_signature)?
                .ok_or(ArchiveError::OffsetsNotFound("record table"))?;

        // The first record opened the signature; walk the rest for the table's own record.
        let mut position = table_offset + RECORD_SIZE;
        let mut table_size = None;
        while position + RECORD_SIZE <= len {
            reader.seek(SeekFrom::Start(position))?;
            if reader.read_u32::<LittleEndian>()? == layout.table_hash {
                reader.seek(SeekFrom::Start(position + 12))?;
                table_size = Some(reader.read_u32::<LittleEndian>()? as u64);
                break;
            }
            position += RECORD_SIZE;
        }
        let table_size = table_size.ok_or(ArchiveError::OffsetsNotFound("record table size"))?;

        tracing::debug!(
            "Signature scan found data_offset={} table_offset={} table_size={}",
            data_offset,
            table_offset,
            table_size
        );

        Ok(ContainerOffsets {
            data_offset,
            table_offset,
            table_size,
        })
    }
}

fn scan_blocks<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    len: u64,
    block_size: u64,
    signature: u64,
) -> Result<Option<u64>> {
    let mut position = start;
    while position < len {
        reader.seek(SeekFrom::Start(position))?;
        match reader.read_u64::<LittleEndian>() {
            Ok(value) if value == signature => return Ok(Some(position)),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        position += block_size;
    }
    Ok(None)
}
