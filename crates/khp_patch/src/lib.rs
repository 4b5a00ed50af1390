//! Patch packages (`.kh1patch`).
//!
//! A package bundles replacement payloads, relinks and new entries for a
//! KINGDOM archive, plus optional author/changelog/credits text.
//!
//! ```text
//! 0   u32  magic 0x5031484B ("KH1P")
//! 4   u32  version marker: bits 0..23 release, bits 24..31 layout revision
//! 8   u32  record count
//! 12  var  author (7-bit length prefix + UTF-8)
//!     record table (classic: 16-byte records, extended: 20-byte records)
//!     extended only: changelog, credits, notes
//!     payloads at absolute offsets
//! ```
//!
//! A record whose offset is zero relinks its hash to the hash stored in the size
//! field.

use camino::Utf8Path;
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
};

pub mod builder;
mod error;
mod metadata;
mod read;
mod record;
pub mod utils;

pub use builder::{PatchBuilderError, PatchEntryBuilder, PatchPackageBuilder};
pub use error::PatchError;
pub use metadata::PatchMetadata;
pub use record::{LayoutRevision, ParentStore, PatchRecord};

/// "KH1P"
pub const MAGIC: u32 = 0x5031_484B;

/// Empty author and a single relinking classic record.
pub const MIN_PACKAGE_SIZE: u64 = 29;

/// A mounted patch package. Records are immutable once parsed.
#[derive(Debug)]
pub struct PatchPackage<TSource: Read + Seek> {
    /// Release number chosen by the author.
    pub release: u32,
    pub revision: LayoutRevision,
    pub metadata: PatchMetadata,
    /// Records in package order.
    pub records: Vec<PatchRecord>,

    source: TSource,
}

impl PatchPackage<BufReader<File>> {
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<Self, PatchError> {
        let file = File::open(path.as_ref())?;
        Self::mount_from_reader(BufReader::new(file))
    }
}

impl<TSource: Read + Seek> PatchPackage<TSource> {
    /// The version marker as stored in the header.
    pub fn version_marker(&self) -> u32 {
        ((self.revision as u32) << 24) | self.release
    }

    pub fn author(&self) -> Option<&str> {
        self.metadata.author()
    }

    pub fn record(&self, hash: u32) -> Option<&PatchRecord> {
        self.records.iter().rev().find(|record| record.hash == hash)
    }

    /// Load the stored bytes of a record.
    pub fn load_record_raw(&mut self, record: &PatchRecord) -> Result<Box<[u8]>, PatchError> {
        let range = record
            .backing_range()
            .ok_or(PatchError::NoPayload(record.hash))?;
        self.source.seek(SeekFrom::Start(range.start))?;
        let mut data = vec![0u8; (range.end - range.start) as usize];
        self.source.read_exact(&mut data)?;
        Ok(data.into_boxed_slice())
    }

    /// Load a record and decode it if it is compressed.
    pub fn load_record_decompressed(&mut self, record: &PatchRecord) -> Result<Box<[u8]>, PatchError> {
        let raw = self.load_record_raw(record)?;
        if !record.compressed {
            return Ok(raw);
        }
        let data = khp_codec::decompress(&raw, record.uncompressed_size as usize)?;
        Ok(data.into_boxed_slice())
    }
}
