//! Record table and container access for KINGDOM archives.
//!
//! A disc image embeds a hash-indexed archive: a data region holding every file
//! on block boundaries, and a record table (itself one of those files) mapping
//! name hashes to `(flags, block, size)`. This crate reads that table from a base
//! container, finds where it lives, and describes the container layout that a
//! rebuild has to keep consistent.
//!
//! # Example
//!
//! ```no_run
//! use khp_archive::{BaseArchive, ContainerLayout, SignatureScan};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut base = BaseArchive::open("KHFM.ISO", ContainerLayout::default(), &SignatureScan)?;
//! let hash = khp_archive::hash_name("system.cnf");
//! if let Some(record) = base.table().locate(hash).copied() {
//!     let bytes = base.read_record(&record)?;
//!     println!("system.cnf: {} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod base;
pub mod error;
pub mod layout;
pub mod locate;
mod record;
pub mod table;
mod utils;

pub use base::BaseArchive;
pub use error::{ArchiveError, Result};
pub use layout::{
    ContainerLayout, FieldEncoding, HeaderMirror, MirrorField, MirrorSlot, VolumeField,
    KINGDOM_IDX_HASH, KINGDOM_IMG_HASH,
};
pub use locate::{ContainerOffsets, FixedOffsets, OffsetLocator, SignatureScan};
pub use record::{ArchiveRecord, COMPRESSED_FLAG, RECORD_SIZE};
pub use table::RecordTable;
pub use utils::{hash_name, parse_hash};
