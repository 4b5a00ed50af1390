use crate::error::PatchError;
use crate::metadata::{decode_author, PatchMetadata};
use crate::record::{
    ClassicRecord, ExtendedRecord, LayoutRevision, ParentStore, PatchRecord, COMPRESSED_BIT,
    NEW_ENTRY_BIT,
};
use crate::utils::read_prefixed_bytes;
use crate::{PatchPackage, MAGIC, MIN_PACKAGE_SIZE};
use binrw::BinRead;
use byteorder::{ReadBytesExt, LE};
use std::io::{Read, Seek, SeekFrom};

impl<TSource: Read + Seek> PatchPackage<TSource> {
    /// Parse a package. The source is kept for payload reads.
    pub fn mount_from_reader(mut source: TSource) -> Result<Self, PatchError> {
        let len = source.seek(SeekFrom::End(0))?;
        if len < MIN_PACKAGE_SIZE {
            return Err(PatchError::InvalidFormat(format!(
                "package is too small ({} bytes)",
                len
            )));
        }

        source.seek(SeekFrom::Start(0))?;
        let magic = source.read_u32::<LE>()?;
        if magic != MAGIC {
            return Err(PatchError::InvalidFormat(format!(
                "bad magic {:08x}",
                magic
            )));
        }

        let version_marker = source.read_u32::<LE>()?;
        let revision = LayoutRevision::try_from((version_marker >> 24) as u8)?;
        let release = version_marker & 0x00FF_FFFF;

        let record_count = source.read_u32::<LE>()?;
        if record_count == 0 {
            return Err(PatchError::CorruptTable("package has no records".to_string()));
        }

        let remaining = len - source.stream_position()?;
        let author = read_prefixed_bytes(&mut source, remaining).map_err(|e| match e {
            PatchError::Io(_) => PatchError::CorruptTable("author string is truncated".to_string()),
            other => other,
        })?;
        let mut metadata = PatchMetadata {
            author: decode_author(author),
            ..Default::default()
        };

        let table_offset = source.stream_position()?;
        let table_size = record_count as u64 * revision.record_size();
        if table_offset + table_size > len {
            return Err(PatchError::CorruptTable(format!(
                "{} records of {} bytes do not fit in the package",
                record_count,
                revision.record_size()
            )));
        }

        let mut records = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            let record = match revision {
                LayoutRevision::Classic => {
                    let raw = ClassicRecord::read(&mut source)?;
                    Self::from_classic(&mut source, raw, len)?
                }
                LayoutRevision::Extended => {
                    let raw = ExtendedRecord::read(&mut source)?;
                    from_extended(raw, len)?
                }
            };
            records.push(record);
        }

        if revision == LayoutRevision::Extended {
            let metadata_offset = table_offset + table_size;
            source.seek(SeekFrom::Start(metadata_offset))?;
            if let Err(e) = metadata.read_extended(&mut source, len - metadata_offset) {
                tracing::warn!("Ignoring unreadable package metadata: {}", e);
                metadata = PatchMetadata {
                    author: metadata.author.take(),
                    ..Default::default()
                };
            }
        }

        tracing::debug!(
            "Mounted patch package release={} revision={} records={}",
            release,
            revision,
            records.len()
        );

        Ok(Self {
            release,
            revision,
            metadata,
            records,
            source,
        })
    }

    /// Classic records keep no uncompressed size; compressed payloads carry it in
    /// their trailer.
    fn from_classic(
        source: &mut TSource,
        raw: ClassicRecord,
        len: u64,
    ) -> Result<PatchRecord, PatchError> {
        let compressed = raw.flags & COMPRESSED_BIT != 0;
        let mut record = validate(
            raw.hash,
            raw.offset,
            raw.size,
            PatchRecord {
                hash: raw.hash,
                parent: ParentStore::Primary,
                data_offset: raw.offset,
                compressed_size: raw.size,
                uncompressed_size: raw.size,
                relink_target: None,
                compressed,
                is_new: false,
            },
            len,
        )?;

        if compressed && !record.is_relink() {
            if (raw.size as usize) < khp_codec::TRAILER_LEN {
                return Err(PatchError::CorruptTable(format!(
                    "compressed record {:08x} is too short to carry a trailer",
                    raw.hash
                )));
            }
            let resume = source.stream_position()?;
            let trailer_offset = raw.offset as u64 + raw.size as u64 - khp_codec::TRAILER_LEN as u64;
            source.seek(SeekFrom::Start(trailer_offset))?;
            let mut trailer = [0u8; khp_codec::TRAILER_LEN];
            source.read_exact(&mut trailer)?;
            source.seek(SeekFrom::Start(resume))?;

            if let Some(trailer) = khp_codec::Trailer::read(&trailer) {
                record.uncompressed_size = trailer.uncompressed_len;
            }
        }

        Ok(record)
    }
}

fn from_extended(raw: ExtendedRecord, len: u64) -> Result<PatchRecord, PatchError> {
    let compressed = raw.attributes & COMPRESSED_BIT != 0;
    validate(
        raw.hash,
        raw.offset,
        raw.compressed_size,
        PatchRecord {
            hash: raw.hash,
            parent: raw.parent()?,
            data_offset: raw.offset,
            compressed_size: raw.compressed_size,
            uncompressed_size: if compressed {
                raw.uncompressed_size
            } else {
                raw.compressed_size
            },
            relink_target: None,
            compressed,
            is_new: raw.attributes & NEW_ENTRY_BIT != 0,
        },
        len,
    )
}

/// Shared checks. `offset == 0` turns the record into a relink to `size_or_target`.
fn validate(
    hash: u32,
    offset: u32,
    size_or_target: u32,
    mut record: PatchRecord,
    len: u64,
) -> Result<PatchRecord, PatchError> {
    if hash == 0 {
        return Err(PatchError::CorruptTable("record with a zero hash".to_string()));
    }

    if offset == 0 {
        if size_or_target == 0 {
            return Err(PatchError::CorruptTable(format!(
                "record {:08x} has neither a payload nor a relink target",
                hash
            )));
        }
        record.relink_target = Some(size_or_target);
        record.compressed_size = 0;
        record.uncompressed_size = 0;
        // Relinks take the target's flags.
        record.compressed = false;
        return Ok(record);
    }

    if size_or_target == 0 {
        return Err(PatchError::CorruptTable(format!(
            "record {:08x} has an empty payload",
            hash
        )));
    }
    if offset as u64 + size_or_target as u64 > len {
        return Err(PatchError::CorruptTable(format!(
            "payload of record {:08x} ({}..{}) lies outside the package ({} bytes)",
            hash,
            offset,
            offset as u64 + size_or_target as u64,
            len
        )));
    }
    Ok(record)
}
