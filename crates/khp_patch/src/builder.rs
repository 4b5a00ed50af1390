use crate::metadata::PatchMetadata;
use crate::record::{
    ClassicRecord, ExtendedRecord, LayoutRevision, ParentStore, PatchRecord, COMPRESSED_BIT,
};
use crate::utils::write_prefixed_str;
use crate::MAGIC;
use binrw::BinWrite;
use byteorder::{WriteBytesExt, LE};
use indexmap::IndexMap;
use std::io::{self, BufWriter, Cursor, Seek, SeekFrom, Write};

#[derive(Debug, thiserror::Error)]
pub enum PatchBuilderError {
    #[error("io error: {0}")]
    IoError(#[from] io::Error),

    #[error("binrw error: {0}")]
    BinWriteError(#[from] binrw::Error),

    #[error("package has no entries")]
    NoEntries,

    #[error("release number {0} does not fit in 24 bits")]
    ReleaseOutOfRange(u32),

    #[error("entry {0:08x} has no data")]
    EmptyPayload(u32),

    #[error("entry {0:08x} needs the extended layout ({1})")]
    NeedsExtendedLayout(u32, &'static str),

    #[error("entry {0:08x} relinks to hash 0")]
    InvalidRelinkTarget(u32),

    #[error("package exceeds the 4 GiB offset range")]
    TooLarge,
}

/// Writes patch packages.
#[derive(Debug, Clone, Default)]
pub struct PatchPackageBuilder {
    pub release: u32,
    pub revision: LayoutRevision,
    pub metadata: PatchMetadata,
    pub entries: IndexMap<u32, PatchEntryBuilder>,
}

/// One entry to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntryBuilder {
    pub hash: u32,
    pub relink_target: Option<u32>,
    /// Compress the provided data with the codec.
    pub compress: bool,
    /// The provided data is already compressed.
    pub precompressed: bool,
    pub is_new: bool,
    pub parent: ParentStore,
}

impl PatchEntryBuilder {
    pub fn new(hash: u32) -> Self {
        Self {
            hash,
            relink_target: None,
            compress: false,
            precompressed: false,
            is_new: false,
            parent: ParentStore::Primary,
        }
    }

    pub fn relink(hash: u32, target: u32) -> Self {
        Self {
            relink_target: Some(target),
            ..Self::new(hash)
        }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Mark the data as an already compressed blob (payload plus trailer).
    pub fn with_precompressed(mut self, precompressed: bool) -> Self {
        self.precompressed = precompressed;
        self
    }

    pub fn with_new(mut self, is_new: bool) -> Self {
        self.is_new = is_new;
        self
    }

    pub fn with_parent(mut self, parent: ParentStore) -> Self {
        self.parent = parent;
        self
    }
}

impl PatchPackageBuilder {
    pub fn with_release(mut self, release: u32) -> Self {
        self.release = release;
        self
    }

    pub fn with_revision(mut self, revision: LayoutRevision) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_metadata(mut self, metadata: PatchMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = Some(author.into());
        self
    }

    /// Add an entry, replacing any earlier entry with the same hash.
    pub fn with_entry(mut self, entry: PatchEntryBuilder) -> Self {
        self.entries.insert(entry.hash, entry);
        self
    }

    /// Build the package and write it to the given writer.
    ///
    /// * `writer` - The writer to write the package to.
    /// * `provide_entry_data` - A function that provides the raw data for each
    ///   non-relinking entry.
    pub fn build_to_writer<
        TWriter: io::Write + io::Seek,
        TEntryDataProvider: Fn(&PatchEntryBuilder, &mut Cursor<Vec<u8>>) -> Result<(), PatchBuilderError>,
    >(
        self,
        writer: &mut TWriter,
        provide_entry_data: TEntryDataProvider,
    ) -> Result<Vec<PatchRecord>, PatchBuilderError> {
        self.validate()?;
        let mut writer = BufWriter::new(writer);
        let base = writer.stream_position()?;

        writer.write_u32::<LE>(MAGIC)?;
        writer.write_u32::<LE>(((self.revision as u32) << 24) | self.release)?;
        writer.write_u32::<LE>(self.entries.len() as u32)?;
        write_prefixed_str(&mut writer, self.metadata.author().unwrap_or_default())?;

        // Reserve the record table, written once payload offsets are known
        let table_offset = writer.stream_position()?;
        let table_size = self.entries.len() as u64 * self.revision.record_size();
        writer.write_all(&vec![0; table_size as usize])?;

        if self.revision == LayoutRevision::Extended {
            self.metadata.write_extended(&mut writer)?;
        } else if !self.metadata.fits_classic() {
            tracing::warn!("Classic packages only keep the author, dropping other metadata");
        }

        let mut records = Vec::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            records.push(Self::write_entry(&mut writer, base, entry, &provide_entry_data)?);
        }

        writer.seek(SeekFrom::Start(table_offset))?;
        for record in &records {
            Self::write_record(&mut writer, self.revision, record)?;
        }
        writer.seek(SeekFrom::End(0))?;
        writer.flush()?;

        Ok(records)
    }

    fn validate(&self) -> Result<(), PatchBuilderError> {
        if self.entries.is_empty() {
            return Err(PatchBuilderError::NoEntries);
        }
        if self.release > 0x00FF_FFFF {
            return Err(PatchBuilderError::ReleaseOutOfRange(self.release));
        }
        for entry in self.entries.values() {
            if entry.relink_target == Some(0) {
                return Err(PatchBuilderError::InvalidRelinkTarget(entry.hash));
            }
            if self.revision == LayoutRevision::Classic {
                if entry.is_new {
                    return Err(PatchBuilderError::NeedsExtendedLayout(entry.hash, "new entry"));
                }
                if entry.parent != ParentStore::Primary {
                    return Err(PatchBuilderError::NeedsExtendedLayout(
                        entry.hash,
                        "container entry",
                    ));
                }
            }
        }
        Ok(())
    }

    fn write_entry<TWriter: io::Write + io::Seek, TEntryDataProvider>(
        writer: &mut BufWriter<TWriter>,
        base: u64,
        entry: &PatchEntryBuilder,
        provide_entry_data: &TEntryDataProvider,
    ) -> Result<PatchRecord, PatchBuilderError>
    where
        TEntryDataProvider: Fn(&PatchEntryBuilder, &mut Cursor<Vec<u8>>) -> Result<(), PatchBuilderError>,
    {
        let mut record = PatchRecord {
            hash: entry.hash,
            parent: entry.parent,
            data_offset: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            relink_target: entry.relink_target,
            compressed: false,
            is_new: entry.is_new,
        };
        if entry.relink_target.is_some() {
            return Ok(record);
        }

        let mut cursor = Cursor::new(Vec::new());
        provide_entry_data(entry, &mut cursor)?;
        let data = cursor.into_inner();
        if data.is_empty() {
            return Err(PatchBuilderError::EmptyPayload(entry.hash));
        }

        let (payload, compressed, uncompressed_size) = if entry.precompressed {
            let uncompressed = khp_codec::Trailer::read(&data)
                .map(|trailer| trailer.uncompressed_len)
                .unwrap_or(data.len() as u32);
            (data, true, uncompressed)
        } else if entry.compress {
            let uncompressed = data.len() as u32;
            match khp_codec::compress(&data) {
                Ok(packed) => (packed, true, uncompressed),
                Err(e) => {
                    tracing::debug!("Storing {:08x} uncompressed: {}", entry.hash, e);
                    (data, false, uncompressed)
                }
            }
        } else {
            let len = data.len() as u32;
            (data, false, len)
        };

        let offset = writer.stream_position()? - base;
        if offset + payload.len() as u64 > u32::MAX as u64 {
            return Err(PatchBuilderError::TooLarge);
        }
        writer.write_all(&payload)?;

        record.data_offset = offset as u32;
        record.compressed_size = payload.len() as u32;
        record.uncompressed_size = uncompressed_size;
        record.compressed = compressed;
        Ok(record)
    }

    fn write_record<W: io::Write + io::Seek>(
        writer: &mut W,
        revision: LayoutRevision,
        record: &PatchRecord,
    ) -> Result<(), PatchBuilderError> {
        let size_or_target = record.relink_target.unwrap_or(record.compressed_size);
        match revision {
            LayoutRevision::Classic => ClassicRecord {
                hash: record.hash,
                flags: if record.compressed { COMPRESSED_BIT } else { 0 },
                offset: record.data_offset,
                size: size_or_target,
            }
            .write(writer)?,
            LayoutRevision::Extended => ExtendedRecord {
                hash: record.hash,
                offset: record.data_offset,
                compressed_size: size_or_target,
                uncompressed_size: record.uncompressed_size,
                attributes: ExtendedRecord::attributes_for(record),
            }
            .write(writer)?,
        }
        Ok(())
    }
}
