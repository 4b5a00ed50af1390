//! The hash-indexed record table of a base container.

use crate::error::{ArchiveError, Result};
use crate::record::{ArchiveRecord, RECORD_SIZE};
use binrw::BinRead;
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Records of a base container, in physical order, with a hash index.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    records: Vec<ArchiveRecord>,
    index: HashMap<u32, usize>,
    data_offset: u64,
}

impl RecordTable {
    /// Read `table_size` bytes of records starting at the absolute `table_offset`.
    ///
    /// Padding records (hash 0) are skipped and the result is sorted by block.
    pub fn read<R: Read + Seek>(
        reader: &mut R,
        data_offset: u64,
        table_offset: u64,
        table_size: u64,
    ) -> Result<Self> {
        if table_size % RECORD_SIZE != 0 {
            return Err(ArchiveError::CorruptTable(format!(
                "table size {} is not a multiple of {}",
                table_size, RECORD_SIZE
            )));
        }

        let mut raw = vec![0u8; table_size as usize];
        reader.seek(SeekFrom::Start(table_offset))?;
        reader.read_exact(&mut raw).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ArchiveError::CorruptTable(format!(
                "table at {} ({} bytes) extends past the end of the container",
                table_offset, table_size
            )),
            _ => ArchiveError::Io(e),
        })?;

        let count = (table_size / RECORD_SIZE) as usize;
        let mut cursor = Cursor::new(raw);
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(ArchiveRecord::read(&mut cursor)?);
        }

        let table = Self::from_records(records, data_offset);
        tracing::debug!(
            "Read record table offset={} size={} records={}",
            table_offset,
            table_size,
            table.len()
        );
        Ok(table)
    }

    /// Build a table from records in any order.
    pub fn from_records(records: impl IntoIterator<Item = ArchiveRecord>, data_offset: u64) -> Self {
        let mut records: Vec<ArchiveRecord> =
            records.into_iter().filter(|r| !r.is_padding()).collect();
        records.sort_by_key(|r| r.block);

        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            if index.contains_key(&record.hash) {
                tracing::warn!(
                    "Duplicate record {:08x} at block {}, keeping the first occurrence",
                    record.hash,
                    record.block
                );
                continue;
            }
            index.insert(record.hash, position);
        }

        Self {
            records,
            index,
            data_offset,
        }
    }

    /// Records sorted by block ascending.
    pub fn records(&self) -> &[ArchiveRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchiveRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by hash. `None` means the base does not carry the hash.
    pub fn locate(&self, hash: u32) -> Option<&ArchiveRecord> {
        self.index.get(&hash).map(|&position| &self.records[position])
    }

    pub fn contains(&self, hash: u32) -> bool {
        self.index.contains_key(&hash)
    }

    /// Absolute byte offset of the data region base.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Absolute byte offset of a record's bytes in the container.
    pub fn absolute_offset(&self, record: &ArchiveRecord, block_size: u32) -> u64 {
        self.data_offset + record.relative_offset(block_size)
    }
}
