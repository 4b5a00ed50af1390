//! Read-only access to a base container.

use crate::error::{ArchiveError, Result};
use crate::layout::ContainerLayout;
use crate::locate::{ContainerOffsets, OffsetLocator};
use crate::record::ArchiveRecord;
use crate::table::RecordTable;
use camino::Utf8Path;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

/// Buffer size used when streaming entries out of the container.
pub const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// An opened base container together with its record table.
#[derive(Debug)]
pub struct BaseArchive<R> {
    source: R,
    layout: ContainerLayout,
    offsets: ContainerOffsets,
    table: RecordTable,
    len: u64,
}

impl BaseArchive<BufReader<File>> {
    /// Open a container file read-only.
    pub fn open<L: OffsetLocator>(
        path: impl AsRef<Utf8Path>,
        layout: ContainerLayout,
        locator: &L,
    ) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Opening base container {}", path);
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), layout, locator)
    }
}

impl<R: Read + Seek> BaseArchive<R> {
    pub fn from_reader<L: OffsetLocator>(
        mut source: R,
        layout: ContainerLayout,
        locator: &L,
    ) -> Result<Self> {
        let len = source.seek(SeekFrom::End(0))?;
        let block_size = layout.block_size as u64;
        if len < block_size {
            return Err(ArchiveError::InvalidFormat(format!(
                "container is too small ({} bytes)",
                len
            )));
        }
        if len % block_size != 0 {
            tracing::warn!(
                "Container size {} is not a multiple of {} bytes, the image may be a bad rip",
                len,
                block_size
            );
        }

        let offsets = locator.locate(&mut source, &layout)?;
        tracing::info!(
            "Data region at {}, record table at {} ({} bytes)",
            offsets.data_offset,
            offsets.table_offset,
            offsets.table_size
        );

        let table = RecordTable::read(
            &mut source,
            offsets.data_offset,
            offsets.table_offset,
            offsets.table_size,
        )?;

        Ok(Self {
            source,
            layout,
            offsets,
            table,
            len,
        })
    }

    pub fn layout(&self) -> &ContainerLayout {
        &self.layout
    }

    pub fn offsets(&self) -> ContainerOffsets {
        self.offsets
    }

    pub fn table(&self) -> &RecordTable {
        &self.table
    }

    /// Total container length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read a record's stored bytes into memory.
    pub fn read_record(&mut self, record: &ArchiveRecord) -> Result<Vec<u8>> {
        let offset = self.record_offset(record)?;
        self.source.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; record.size as usize];
        self.source.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Stream a record's stored bytes into `writer`. Returns the number of bytes copied.
    pub fn copy_record_to<W: Write>(&mut self, record: &ArchiveRecord, writer: &mut W) -> Result<u64> {
        let offset = self.record_offset(record)?;
        self.copy_raw_to(offset, record.size as u64, writer)
    }

    /// Stream `len` bytes starting at the absolute `offset` into `writer`.
    pub fn copy_raw_to<W: Write>(&mut self, offset: u64, len: u64, writer: &mut W) -> Result<u64> {
        if offset + len > self.len {
            return Err(ArchiveError::InvalidFormat(format!(
                "range {}..{} is outside the container ({} bytes)",
                offset,
                offset + len,
                self.len
            )));
        }

        self.source.seek(SeekFrom::Start(offset))?;
        let mut buffer = [0u8; COPY_BUFFER_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
            self.source.read_exact(&mut buffer[..chunk])?;
            writer.write_all(&buffer[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(len)
    }

    fn record_offset(&self, record: &ArchiveRecord) -> Result<u64> {
        let offset = self.table.absolute_offset(record, self.layout.block_size);
        if offset + record.size as u64 > self.len {
            return Err(ArchiveError::CorruptTable(format!(
                "record {:08x} at block {} ({} bytes) extends past the end of the container",
                record.hash, record.block, record.size
            )));
        }
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::{FixedOffsets, SignatureScan};
    use binrw::BinWrite;
    use std::io::Cursor;

    const BLOCK: usize = 2048;

    /// Data region at block 1, table at block 2, one payload entry at relative block 3.
    fn small_container(layout: &ContainerLayout) -> Vec<u8> {
        let mut image = vec![0u8; BLOCK * 6];
        image[BLOCK..BLOCK + 8].copy_from_slice(&layout.data_signature.to_le_bytes());

        let records = [
            ArchiveRecord::new(0x171d, 1, 1, 16),
            ArchiveRecord::new(layout.table_hash, 0, 1, BLOCK as u32),
            ArchiveRecord::new(0xAB, 0, 3, 5),
        ];
        let mut cursor = Cursor::new(Vec::new());
        for record in &records {
            record.write(&mut cursor).unwrap();
        }
        let table = cursor.into_inner();
        image[BLOCK * 2..BLOCK * 2 + table.len()].copy_from_slice(&table);

        image[BLOCK * 4..BLOCK * 4 + 5].copy_from_slice(b"hello");
        image
    }

    #[test]
    fn test_open_with_signature_scan() {
        let layout = ContainerLayout::default();
        let image = small_container(&layout);

        let mut base = BaseArchive::from_reader(Cursor::new(image), layout, &SignatureScan).unwrap();
        assert_eq!(base.offsets().data_offset, BLOCK as u64);
        assert_eq!(base.offsets().table_offset, (BLOCK * 2) as u64);
        assert_eq!(base.table().len(), 3);

        let record = *base.table().locate(0xAB).unwrap();
        assert_eq!(base.read_record(&record).unwrap(), b"hello");

        let mut out = Vec::new();
        assert_eq!(base.copy_record_to(&record, &mut out).unwrap(), 5);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_open_rejects_tiny_container() {
        let err = BaseArchive::from_reader(
            Cursor::new(vec![0u8; 100]),
            ContainerLayout::default(),
            &SignatureScan,
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidFormat(_)));
    }

    #[test]
    fn test_record_past_end_is_corrupt() {
        let layout = ContainerLayout::default();
        let image = small_container(&layout);
        let mut base = BaseArchive::from_reader(
            Cursor::new(image),
            layout,
            &FixedOffsets(ContainerOffsets {
                data_offset: BLOCK as u64,
                table_offset: (BLOCK * 2) as u64,
                table_size: 48,
            }),
        )
        .unwrap();

        let bogus = ArchiveRecord::new(0xCD, 0, 100, 10);
        assert!(matches!(
            base.read_record(&bogus),
            Err(ArchiveError::CorruptTable(_))
        ));
    }

    #[test]
    fn test_copy_large_range_in_chunks() {
        let layout = ContainerLayout::default();
        let mut image = small_container(&layout);
        image.resize(BLOCK * 10, 0);
        for (i, byte) in image.iter_mut().enumerate().skip(BLOCK * 3) {
            *byte = (i % 251) as u8;
        }
        let expected = image[BLOCK * 3..].to_vec();
        let mut base = BaseArchive::from_reader(
            Cursor::new(image),
            layout,
            &FixedOffsets(ContainerOffsets {
                data_offset: BLOCK as u64,
                table_offset: (BLOCK * 2) as u64,
                table_size: 48,
            }),
        )
        .unwrap();

        let mut out = Vec::new();
        base.copy_raw_to((BLOCK * 3) as u64, expected.len() as u64, &mut out)
            .unwrap();
        assert_eq!(out, expected);
    }
}
