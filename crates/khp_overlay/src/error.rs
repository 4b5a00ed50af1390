//! Error types for overlay and rebuild operations.
//!
//! All fallible functions in this crate return [`Result<T>`]. Errors from the
//! archive, package and codec crates convert via `From`.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Reading the base container or writing the output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binrw error: {0}")]
    Binrw(#[from] binrw::Error),

    /// The base container or its record table is unusable.
    #[error("archive error: {0}")]
    Archive(#[from] khp_archive::ArchiveError),

    /// A patch payload could not be read.
    #[error("patch error: {0}")]
    Patch(#[from] khp_patch::PatchError),

    #[error("codec error: {0}")]
    Codec(#[from] khp_codec::CodecError),

    /// The rebuild session was driven out of order. Always a programming error.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// An external header file is unusable.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A block number or size does not fit in a 32-bit record field.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// The rebuild observed a cancellation request.
    #[error("rebuild cancelled")]
    Cancelled,
}

impl Error {
    /// Build a [`Error::ContractViolation`] and log it.
    pub(crate) fn contract(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("Rebuild session contract violation: {}", message);
        Error::ContractViolation(message)
    }
}
