use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binrw error: {0}")]
    Binrw(#[from] binrw::Error),

    /// Not a patch package at all (size, magic or layout revision).
    #[error("invalid patch package: {0}")]
    InvalidFormat(String),

    /// The record table is malformed.
    #[error("corrupt record table: {0}")]
    CorruptTable(String),

    #[error("codec error: {0}")]
    Codec(#[from] khp_codec::CodecError),

    /// Relinking records have no payload to load.
    #[error("record {0:08x} is a relink and carries no payload")]
    NoPayload(u32),
}
