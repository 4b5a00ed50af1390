//! Single-use writer for a rebuilt container.
//!
//! A [`RebuildSession`] moves through `Created → HeaderWritten → TableReserved →
//! Finalized`. Entries are appended at the end of the output on block boundaries
//! and their records collected in emission order; [`finalize`](RebuildSession::finalize)
//! resolves queued relinks, writes the records sorted by hash into the space
//! reserved for the table, backpatches the header and syncs the output.
//!
//! Calls out of order fail with [`Error::ContractViolation`].

use crate::error::{Error, Result};
use binrw::BinWrite;
use byteorder::{ReadBytesExt, LE};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use khp_archive::{
    ArchiveRecord, BaseArchive, ContainerLayout, MirrorField, MirrorSlot, RECORD_SIZE,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};

/// Output that can be forced to stable storage.
pub trait DurableWrite: Write + Seek {
    fn sync(&mut self) -> io::Result<()>;
}

impl DurableWrite for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl DurableWrite for Cursor<Vec<u8>> {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: DurableWrite> DurableWrite for BufWriter<W> {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_mut().sync()
    }
}

impl<W: DurableWrite + ?Sized> DurableWrite for &mut W {
    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

/// An output file that is deleted on drop unless committed.
#[derive(Debug)]
pub struct FileOutput {
    path: Utf8PathBuf,
    writer: Option<BufWriter<File>>,
    committed: bool,
}

impl FileOutput {
    pub fn create(path: impl AsRef<Utf8Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            committed: false,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Keep the file when this value is dropped.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "output already closed"))
    }
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Seek for FileOutput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.writer()?.seek(pos)
    }
}

impl DurableWrite for FileOutput {
    fn sync(&mut self) -> io::Result<()> {
        self.writer()?.sync()
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        // Close the handle before removing the file.
        drop(self.writer.take());
        if self.committed {
            return;
        }
        tracing::warn!("Output {} was never finalized, deleting incomplete file", self.path);
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::error!("Cannot delete {}: {}", self.path, e);
        }
    }
}

/// Where the container header comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HeaderSource {
    /// Copy `header_len` bytes from the base container.
    #[default]
    FromBase,
    /// Contents of a header file: a little-endian flag word followed by the header.
    External(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    HeaderWritten,
    TableReserved,
    Finalized,
}

/// Outcome of [`RebuildSession::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeSummary {
    pub table_offset: u64,
    pub table_size: u64,
    /// Records written to the table.
    pub record_count: usize,
    /// Queued relinks resolved at finalize.
    pub resolved_late: usize,
    /// Queued `(source, target)` relinks whose target was never emitted.
    pub unresolved: Vec<(u32, u32)>,
    /// Size recorded for the image record, if the layout has one.
    pub image_len: Option<u32>,
    /// Length of the finished container.
    pub total_len: u64,
}

#[derive(Debug, Clone, Copy)]
struct ReservedTable {
    offset: u64,
    size: u64,
}

pub struct RebuildSession<W: DurableWrite> {
    output: W,
    layout: ContainerLayout,
    update_headers: bool,
    state: SessionState,
    header_flags: u32,
    data_offset: u64,
    /// End of the written data; every entry starts here.
    position: u64,
    table: Option<ReservedTable>,
    image_start: Option<u64>,
    image_end: Option<u64>,
    records: Vec<ArchiveRecord>,
    emitted: HashMap<u32, usize>,
    pending_relinks: IndexMap<u32, u32>,
}

impl<W: DurableWrite> RebuildSession<W> {
    /// Start a session writing into an empty `output`.
    pub fn new(output: W, layout: ContainerLayout, update_headers: bool) -> Self {
        Self {
            output,
            layout,
            update_headers,
            state: SessionState::Created,
            header_flags: 0,
            data_offset: 0,
            position: 0,
            table: None,
            image_start: None,
            image_end: None,
            records: Vec::with_capacity(16),
            emitted: HashMap::new(),
            pending_relinks: IndexMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Absolute offset of the data region base, known once the header is written.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Records emitted so far, in emission order.
    pub fn records(&self) -> &[ArchiveRecord] {
        &self.records
    }

    /// Number of relinks waiting for their target.
    pub fn pending_relinks(&self) -> usize {
        self.pending_relinks.len()
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    pub fn write_header<R: Read + Seek>(
        &mut self,
        source: &HeaderSource,
        base: &mut BaseArchive<R>,
    ) -> Result<()> {
        match source {
            HeaderSource::FromBase => self.copy_header(base),
            HeaderSource::External(bytes) => self.write_external_header(bytes),
        }
    }

    /// Copy the layout's header from the base container.
    pub fn copy_header<R: Read + Seek>(&mut self, base: &mut BaseArchive<R>) -> Result<()> {
        self.expect_state(SessionState::Created, "write the header")?;
        self.output.seek(SeekFrom::Start(0))?;
        let len = base.copy_raw_to(0, self.layout.header_len, &mut self.output)?;
        self.header_written(len, 0);
        tracing::info!("Copied {} header bytes from the base container", len);
        Ok(())
    }

    /// Write a header file: a flag word followed by the header bytes.
    pub fn write_external_header(&mut self, contents: &[u8]) -> Result<()> {
        self.expect_state(SessionState::Created, "write the header")?;
        if contents.len() < 4 {
            return Err(Error::InvalidHeader(format!(
                "header file is too small ({} bytes)",
                contents.len()
            )));
        }
        let (mut flag_bytes, header) = contents.split_at(4);
        let flags = flag_bytes.read_u32::<LE>()?;
        if header.len() as u64 % self.layout.block_size as u64 != 0 {
            return Err(Error::InvalidHeader(format!(
                "header length {} is not a multiple of {} bytes",
                header.len(),
                self.layout.block_size
            )));
        }

        self.output.seek(SeekFrom::Start(0))?;
        self.output.write_all(header)?;
        self.header_written(header.len() as u64, flags);
        tracing::info!(
            "Wrote external header ({} bytes, flags {:#04x})",
            header.len(),
            flags
        );
        Ok(())
    }

    fn header_written(&mut self, len: u64, flags: u32) {
        self.header_flags = flags;
        self.data_offset = len;
        self.position = len;
        self.state = SessionState::HeaderWritten;
    }

    /// Reserve zeroed space for a table of `capacity` records at the current position.
    pub fn reserve_table(&mut self, capacity: usize) -> Result<()> {
        self.expect_state(SessionState::HeaderWritten, "reserve the record table")?;

        let offset = self.position;
        let size = self.layout.padded_len(capacity as u64 * RECORD_SIZE);
        self.write_zeros(size)?;
        self.position += size;
        self.table = Some(ReservedTable { offset, size });

        let table_hash = self.layout.table_hash;
        self.push_record(table_hash, 0, offset, size)?;
        self.update_mirrors(table_hash, offset, size)?;

        if let Some(image_hash) = self.layout.image_hash {
            let image_start = self.position;
            self.image_start = Some(image_start);
            self.push_record(image_hash, 0, image_start, 0)?;
            let block = self.absolute_block(image_start)?;
            self.write_mirror_field(image_hash, MirrorField::Block, block)?;
        }

        self.state = SessionState::TableReserved;
        tracing::debug!(
            "Reserved record table at {} ({} bytes, {} records)",
            offset,
            size,
            capacity
        );
        Ok(())
    }

    /// Copy a base record's stored bytes into the output.
    pub fn emit_copy<R: Read + Seek>(
        &mut self,
        base: &mut BaseArchive<R>,
        record: &ArchiveRecord,
    ) -> Result<ArchiveRecord> {
        self.expect_emitting(record.hash)?;
        let start = self.position;
        let len = base.copy_record_to(record, &mut self.output)?;
        self.finish_entry(record.hash, record.flags, start, len)
    }

    /// Write `bytes` as the stored bytes of `hash`.
    pub fn emit_replace(&mut self, hash: u32, bytes: &[u8], flags: u32) -> Result<ArchiveRecord> {
        self.expect_emitting(hash)?;
        let start = self.position;
        self.output.write_all(bytes)?;
        self.finish_entry(hash, flags, start, bytes.len() as u64)
    }

    /// Make `source` share the stored bytes of `target`.
    ///
    /// Returns `true` when `target` was already emitted and the alias was added,
    /// `false` when the request was queued for [`finalize`](Self::finalize).
    pub fn request_relink(&mut self, source: u32, target: u32) -> Result<bool> {
        self.expect_emitting(source)?;

        if let Some(&index) = self.emitted.get(&target) {
            let alias = self.records[index].alias(source);
            self.emitted.insert(source, self.records.len());
            self.records.push(alias);
            tracing::debug!("Relinked {:08x} to {:08x}", source, target);
            return Ok(true);
        }

        if let Some(previous) = self.pending_relinks.insert(source, target) {
            tracing::warn!(
                "Relink of {:08x} to {:08x} replaces the queued relink to {:08x}",
                source,
                target,
                previous
            );
        } else {
            tracing::debug!("Queued relink of {:08x} to {:08x}", source, target);
        }
        Ok(false)
    }

    /// Write the record table and header fields, then sync the output.
    pub fn finalize(&mut self) -> Result<FinalizeSummary> {
        if self.state == SessionState::Finalized {
            return Err(Error::contract("finalize called twice"));
        }
        let table = match (self.state, self.table) {
            (SessionState::TableReserved, Some(table)) => table,
            _ => return Err(Error::contract("finalize called before the table was reserved")),
        };
        let needed = (self.records.len() + self.pending_relinks.len()) as u64 * RECORD_SIZE;
        if needed > table.size {
            return Err(Error::contract(format!(
                "{} records and {} queued relinks need {} bytes, only {} were reserved",
                self.records.len(),
                self.pending_relinks.len(),
                needed,
                table.size
            )));
        }

        let mut resolved_late = 0;
        let mut unresolved = Vec::new();
        for (source, target) in std::mem::take(&mut self.pending_relinks) {
            if self.emitted.contains_key(&source) {
                tracing::warn!("Dropping relink of {:08x}, it was already emitted", source);
                continue;
            }
            match self.emitted.get(&target) {
                Some(&index) => {
                    let alias = self.records[index].alias(source);
                    self.emitted.insert(source, self.records.len());
                    self.records.push(alias);
                    resolved_late += 1;
                }
                None => {
                    tracing::warn!(
                        "Failed to relink {:08x} to {:08x}, the target was never written",
                        source,
                        target
                    );
                    unresolved.push((source, target));
                }
            }
        }

        let image_len = match (self.layout.image_hash, self.image_start) {
            (Some(image_hash), Some(image_start)) => {
                let image_end = self.image_end.unwrap_or(self.position);
                let len = to_u32(image_end.saturating_sub(image_start), "image size")?;
                if let Some(&index) = self.emitted.get(&image_hash) {
                    self.records[index].size = len;
                }
                Some(len)
            }
            _ => None,
        };

        self.records.sort_by_key(|record| record.hash);
        self.emitted.clear();

        let mut buffer = Cursor::new(Vec::with_capacity(table.size as usize));
        for record in &self.records {
            record.write(&mut buffer)?;
        }
        self.output.seek(SeekFrom::Start(table.offset))?;
        self.output.write_all(buffer.get_ref())?;

        if self.update_headers {
            self.write_volume_fields()?;
            if let (Some(image_hash), Some(len)) = (self.layout.image_hash, image_len) {
                self.write_mirror_field(image_hash, MirrorField::Size, len)?;
            }
        }

        self.output.seek(SeekFrom::Start(self.position))?;
        tracing::info!("Flushing output to disk...");
        self.output.flush()?;
        self.output.sync()?;
        self.state = SessionState::Finalized;

        Ok(FinalizeSummary {
            table_offset: table.offset,
            table_size: table.size,
            record_count: self.records.len(),
            resolved_late,
            unresolved,
            image_len,
            total_len: self.position,
        })
    }

    fn expect_state(&self, expected: SessionState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(Error::contract(format!(
                "cannot {} in state {:?}",
                action, self.state
            )));
        }
        Ok(())
    }

    fn expect_emitting(&self, hash: u32) -> Result<()> {
        match self.state {
            SessionState::HeaderWritten | SessionState::TableReserved => {}
            state => {
                return Err(Error::contract(format!(
                    "cannot emit {:08x} in state {:?}",
                    hash, state
                )))
            }
        }
        if self.emitted.contains_key(&hash) {
            return Err(Error::contract(format!("{:08x} was already emitted", hash)));
        }
        Ok(())
    }

    /// Pad the entry written at `start`, record it and update its mirrors.
    fn finish_entry(&mut self, hash: u32, flags: u32, start: u64, len: u64) -> Result<ArchiveRecord> {
        let padded = self.layout.padded_len(len);
        self.write_zeros(padded - len)?;
        self.position = start + padded;

        if self.layout.is_image_terminator(hash) && self.image_end.is_none() {
            self.image_end = Some(start);
        }
        let record = self.push_record(hash, flags, start, len)?;
        self.update_mirrors(hash, start, len)?;

        tracing::debug!(
            "Wrote {:08x} at block {} ({} bytes, flags {:#x})",
            hash,
            record.block,
            len,
            flags
        );
        Ok(record)
    }

    fn push_record(&mut self, hash: u32, flags: u32, start: u64, len: u64) -> Result<ArchiveRecord> {
        let block = to_u32(
            (start - self.data_offset) / self.layout.block_size as u64,
            "block number",
        )?;
        let record = ArchiveRecord::new(hash, flags, block, to_u32(len, "entry size")?);
        self.emitted.insert(hash, self.records.len());
        self.records.push(record);
        Ok(record)
    }

    fn absolute_block(&self, position: u64) -> Result<u32> {
        to_u32(position / self.layout.block_size as u64, "block number")
    }

    fn update_mirrors(&mut self, hash: u32, start: u64, len: u64) -> Result<()> {
        if !self.update_headers || self.layout.mirror(hash).is_none() {
            return Ok(());
        }
        let block = self.absolute_block(start)?;
        self.write_mirror_field(hash, MirrorField::Block, block)?;
        self.write_mirror_field(hash, MirrorField::Size, to_u32(len, "entry size")?)
    }

    fn write_mirror_field(&mut self, hash: u32, field: MirrorField, value: u32) -> Result<()> {
        if !self.update_headers {
            return Ok(());
        }
        let Some(mirror) = self.layout.mirror(hash) else {
            return Ok(());
        };
        let slots: Vec<MirrorSlot> = mirror
            .slots_for(field)
            .filter(|slot| {
                slot.requires_header_flag
                    .map_or(true, |flag| self.header_flags & flag != 0)
            })
            .cloned()
            .collect();
        for slot in slots {
            self.output.seek(SeekFrom::Start(slot.offset))?;
            slot.encoding.write(&mut self.output, value)?;
        }
        self.output.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }

    fn write_volume_fields(&mut self) -> Result<()> {
        let total_blocks = to_u32(
            self.position / self.layout.block_size as u64,
            "container block count",
        )?;
        for field in &self.layout.volume_fields {
            let value = total_blocks.checked_sub(field.bias).ok_or_else(|| {
                Error::OutOfRange(format!(
                    "container of {} blocks is smaller than the volume bias {}",
                    total_blocks, field.bias
                ))
            })?;
            self.output.seek(SeekFrom::Start(field.offset))?;
            field.encoding.write(&mut self.output, value)?;
        }
        Ok(())
    }

    fn write_zeros(&mut self, len: u64) -> Result<()> {
        io::copy(&mut io::repeat(0).take(len), &mut self.output)?;
        Ok(())
    }
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::OutOfRange(format!("{} {} exceeds 32 bits", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use khp_archive::{FieldEncoding, HeaderMirror, RecordTable, VolumeField};

    const BLOCK: u32 = 16;
    const TABLE: u32 = 0x7AB1;
    const IMAGE: u32 = 0x1A6E;
    const MIRRORED: u32 = 0xAA;
    const TERMINATOR: u32 = 0xEE;

    fn small_layout() -> ContainerLayout {
        ContainerLayout {
            block_size: BLOCK,
            header_len: 64,
            table_hash: TABLE,
            image_hash: None,
            image_terminators: Vec::new(),
            forced_compression: Vec::new(),
            data_signature: 0,
            table_signature: 0,
            mirrors: Vec::new(),
            volume_fields: Vec::new(),
        }
    }

    fn slot(offset: u64, field: MirrorField, encoding: FieldEncoding, flag: Option<u32>) -> MirrorSlot {
        MirrorSlot {
            offset,
            field,
            encoding,
            requires_header_flag: flag,
        }
    }

    fn mirrored_layout() -> ContainerLayout {
        use FieldEncoding::{BothEndian, LittleEndian};
        ContainerLayout {
            image_hash: Some(IMAGE),
            image_terminators: vec![TERMINATOR],
            mirrors: vec![
                HeaderMirror {
                    hash: MIRRORED,
                    slots: vec![
                        slot(0, MirrorField::Block, BothEndian, None),
                        slot(8, MirrorField::Size, LittleEndian, None),
                        slot(12, MirrorField::Block, LittleEndian, Some(0x02)),
                    ],
                },
                HeaderMirror {
                    hash: TABLE,
                    slots: vec![
                        slot(16, MirrorField::Block, LittleEndian, None),
                        slot(20, MirrorField::Size, LittleEndian, None),
                    ],
                },
                HeaderMirror {
                    hash: IMAGE,
                    slots: vec![
                        slot(24, MirrorField::Block, LittleEndian, Some(0x01)),
                        slot(28, MirrorField::Size, LittleEndian, Some(0x01)),
                    ],
                },
            ],
            volume_fields: vec![VolumeField {
                offset: 32,
                encoding: LittleEndian,
                bias: 1,
            }],
            ..small_layout()
        }
    }

    fn session(layout: ContainerLayout, update_headers: bool) -> RebuildSession<Cursor<Vec<u8>>> {
        RebuildSession::new(Cursor::new(Vec::new()), layout, update_headers)
    }

    /// Flag word followed by a zeroed 64-byte header.
    fn header(flags: u32) -> Vec<u8> {
        let mut contents = flags.to_le_bytes().to_vec();
        contents.extend_from_slice(&[0u8; 64]);
        contents
    }

    fn started(capacity: usize) -> RebuildSession<Cursor<Vec<u8>>> {
        let mut session = session(small_layout(), true);
        session.write_external_header(&header(0)).unwrap();
        session.reserve_table(capacity).unwrap();
        session
    }

    fn read_table(bytes: Vec<u8>, summary: &FinalizeSummary) -> RecordTable {
        RecordTable::read(
            &mut Cursor::new(bytes),
            64,
            summary.table_offset,
            summary.table_size,
        )
        .unwrap()
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_entries_are_block_aligned() {
        let mut session = started(4);
        let a = session.emit_replace(0xA, &[1u8; 20], 1).unwrap();
        let b = session.emit_replace(0xB, &[2u8; 16], 0).unwrap();
        assert_eq!((a.block, a.size, a.flags), (4, 20, 1));
        assert_eq!((b.block, b.size), (6, 16));

        let summary = session.finalize().unwrap();
        assert_eq!(summary.table_offset, 64);
        assert_eq!(summary.table_size, 64);
        assert_eq!(summary.record_count, 3);
        assert_eq!(summary.total_len, 64 + 64 + 32 + 16);

        let bytes = session.into_inner().into_inner();
        assert_eq!(bytes.len() as u64, summary.total_len);
        assert_eq!(&bytes[128..148], &[1u8; 20][..]);
        assert_eq!(&bytes[148..160], &[0u8; 12][..]);

        // Sorted by hash in the table region.
        let hashes: Vec<u32> = (0..3).map(|i| u32_at(&bytes, 64 + i * 16)).collect();
        assert_eq!(hashes, vec![0xA, 0xB, TABLE]);

        let table = read_table(bytes, &summary);
        assert_eq!(table.locate(TABLE).unwrap().block, 0);
        assert_eq!(table.locate(TABLE).unwrap().size, 64);
    }

    #[test]
    fn test_immediate_relink() {
        let mut session = started(3);
        let a = session.emit_replace(0xA, &[1u8; 20], 1).unwrap();
        assert!(session.request_relink(0xC, 0xA).unwrap());

        let summary = session.finalize().unwrap();
        assert_eq!(summary.resolved_late, 0);
        let table = read_table(session.into_inner().into_inner(), &summary);
        assert_eq!(*table.locate(0xC).unwrap(), a.alias(0xC));
    }

    #[test]
    fn test_late_relink() {
        let mut session = started(3);
        assert!(!session.request_relink(0xC, 0xA).unwrap());
        assert_eq!(session.pending_relinks(), 1);
        let a = session.emit_replace(0xA, &[1u8; 40], 0).unwrap();

        let summary = session.finalize().unwrap();
        assert_eq!(summary.resolved_late, 1);
        assert!(summary.unresolved.is_empty());
        let table = read_table(session.into_inner().into_inner(), &summary);
        let c = table.locate(0xC).unwrap();
        assert_eq!((c.flags, c.block, c.size), (a.flags, a.block, a.size));
    }

    #[test]
    fn test_requeued_relink_replaces_earlier_request() {
        let mut session = started(3);
        assert!(!session.request_relink(0xC, 0xD).unwrap());
        assert!(!session.request_relink(0xC, 0xA).unwrap());
        assert_eq!(session.pending_relinks(), 1);
        let a = session.emit_replace(0xA, &[1u8; 8], 0).unwrap();

        let summary = session.finalize().unwrap();
        let table = read_table(session.into_inner().into_inner(), &summary);
        assert_eq!(*table.locate(0xC).unwrap(), a.alias(0xC));
    }

    #[test]
    fn test_unresolved_relink_is_dropped() {
        let mut session = started(3);
        session.emit_replace(0xA, &[1u8; 8], 0).unwrap();
        assert!(!session.request_relink(0xC, 0xF).unwrap());

        let summary = session.finalize().unwrap();
        assert_eq!(summary.unresolved, vec![(0xC, 0xF)]);
        assert_eq!(summary.record_count, 2);
        let table = read_table(session.into_inner().into_inner(), &summary);
        assert!(table.locate(0xC).is_none());
    }

    #[test]
    fn test_capacity_counts_queued_relinks() {
        // One block of 16 bytes holds only the table's own record.
        let mut session = started(1);
        session.emit_replace(0xA, &[1u8; 8], 0).unwrap();
        assert!(matches!(session.finalize(), Err(Error::ContractViolation(_))));

        let mut session = started(2);
        session.emit_replace(0xA, &[1u8; 8], 0).unwrap();
        session.request_relink(0xC, 0xF).unwrap();
        assert!(matches!(session.finalize(), Err(Error::ContractViolation(_))));

        let mut session = started(2);
        session.emit_replace(0xA, &[1u8; 8], 0).unwrap();
        assert!(session.finalize().is_ok());
    }

    #[test]
    fn test_state_machine_violations() {
        let mut session = session(small_layout(), true);
        assert!(matches!(
            session.emit_replace(0xA, &[1], 0),
            Err(Error::ContractViolation(_))
        ));
        assert!(matches!(session.reserve_table(1), Err(Error::ContractViolation(_))));
        assert!(matches!(session.finalize(), Err(Error::ContractViolation(_))));

        session.write_external_header(&header(0)).unwrap();
        assert!(matches!(
            session.write_external_header(&header(0)),
            Err(Error::ContractViolation(_))
        ));
        // Entries ahead of the table are allowed.
        session.emit_replace(0xA, &[1], 0).unwrap();
        assert!(matches!(session.finalize(), Err(Error::ContractViolation(_))));
        assert!(matches!(
            session.emit_replace(0xA, &[1], 0),
            Err(Error::ContractViolation(_))
        ));

        session.reserve_table(4).unwrap();
        assert!(matches!(session.reserve_table(4), Err(Error::ContractViolation(_))));
        session.finalize().unwrap();
        assert_eq!(session.state(), SessionState::Finalized);

        assert!(matches!(session.finalize(), Err(Error::ContractViolation(_))));
        assert!(matches!(
            session.emit_replace(0xB, &[1], 0),
            Err(Error::ContractViolation(_))
        ));
        assert!(matches!(
            session.request_relink(0xC, 0xA),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_external_header_validation() {
        let mut session = session(small_layout(), true);
        assert!(matches!(
            session.write_external_header(&[1, 0]),
            Err(Error::InvalidHeader(_))
        ));
        assert!(matches!(
            session.write_external_header(&[0u8; 4 + 10]),
            Err(Error::InvalidHeader(_))
        ));
        assert_eq!(session.state(), SessionState::Created);
    }

    #[test]
    fn test_mirrors_and_volume_fields() {
        let mut session = session(mirrored_layout(), true);
        session.write_external_header(&header(0x01)).unwrap();
        session.reserve_table(4).unwrap();
        session.emit_replace(MIRRORED, &[7u8; 20], 0).unwrap();
        session.emit_replace(TERMINATOR, &[8u8; 5], 0).unwrap();
        let summary = session.finalize().unwrap();

        // Table 64..128, image from 128, terminator at 160, end at 176.
        assert_eq!(summary.image_len, Some(32));
        assert_eq!(summary.total_len, 176);

        let bytes = session.into_inner().into_inner();
        assert_eq!(&bytes[0..8], &[8, 0, 0, 0, 0, 0, 0, 8]);
        assert_eq!(u32_at(&bytes, 8), 20);
        // Gated on flag 0x02, which the header does not set.
        assert_eq!(u32_at(&bytes, 12), 0);
        assert_eq!(u32_at(&bytes, 16), 4);
        assert_eq!(u32_at(&bytes, 20), 64);
        assert_eq!(u32_at(&bytes, 24), 8);
        assert_eq!(u32_at(&bytes, 28), 32);
        assert_eq!(u32_at(&bytes, 32), 176 / 16 - 1);

        let table = read_table(bytes, &summary);
        let image = table.locate(IMAGE).unwrap();
        assert_eq!((image.block, image.size), (4, 32));
    }

    #[test]
    fn test_headers_untouched_when_disabled() {
        let mut session = session(mirrored_layout(), false);
        session.write_external_header(&header(0xFF)).unwrap();
        session.reserve_table(4).unwrap();
        session.emit_replace(MIRRORED, &[7u8; 20], 0).unwrap();
        let summary = session.finalize().unwrap();

        // No terminator: the image runs to the end of the output.
        assert_eq!(summary.image_len, Some(32));
        let bytes = session.into_inner().into_inner();
        assert_eq!(&bytes[..64], &[0u8; 64][..]);
    }

    #[test]
    fn test_file_output_is_deleted_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let discarded = root.join("discarded.iso");
        {
            let mut output = FileOutput::create(&discarded).unwrap();
            output.write_all(b"partial").unwrap();
        }
        assert!(!discarded.exists());

        let kept = root.join("kept.iso");
        {
            let mut output = FileOutput::create(&kept).unwrap();
            output.write_all(b"complete").unwrap();
            output.sync().unwrap();
            output.commit();
        }
        assert_eq!(std::fs::read(&kept).unwrap(), b"complete");
    }
}
