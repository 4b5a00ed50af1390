//! Error types for archive access.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while reading a base container or its record table.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Reading the container failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A fixed-size structure could not be decoded.
    #[error("binary read error: {0}")]
    Binrw(#[from] binrw::Error),

    /// The record table is malformed.
    #[error("corrupt record table: {0}")]
    CorruptTable(String),

    /// The container itself is not usable.
    #[error("invalid container: {0}")]
    InvalidFormat(String),

    /// The offset locator could not find the data region or the record table.
    #[error("failed to find {0} in the container")]
    OffsetsNotFound(&'static str),

    /// A container layout file could not be parsed.
    #[error("invalid layout '{path}': {message}")]
    Layout { path: Utf8PathBuf, message: String },
}
