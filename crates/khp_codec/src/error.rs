use std::fmt;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced by the codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The encoder refused the input. Callers store such entries uncompressed.
    #[error("input is not compressible: {0}")]
    NotCompressible(NotCompressibleReason),

    /// The payload ran out before the output buffer was filled.
    #[error("compressed payload ended with {remaining} output byte(s) still missing")]
    Truncated { remaining: usize },

    /// The blob is shorter than the trailer.
    #[error("compressed payload of {0} byte(s) is too short to carry a trailer")]
    MissingTrailer(usize),

    /// A back-reference points past the end of the output buffer.
    #[error(
        "back-reference distance {distance} reaches past the end of the output (cursor {cursor}, length {len})"
    )]
    InvalidBackReference {
        distance: usize,
        cursor: usize,
        len: usize,
    },
}

/// Why [`compress`](crate::compress) gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotCompressibleReason {
    /// Longer than the 24-bit length field allows.
    TooLarge(usize),
    /// Shorter than [`MIN_INPUT_LEN`](crate::MIN_INPUT_LEN).
    TooSmall(usize),
    /// The output would not be smaller than the input.
    NoGain,
}

impl fmt::Display for NotCompressibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotCompressibleReason::TooLarge(len) => write!(f, "source too big ({len} bytes)"),
            NotCompressibleReason::TooSmall(len) => write!(f, "source too small ({len} bytes)"),
            NotCompressibleReason::NoGain => f.write_str("compressed data is as big as original"),
        }
    }
}

impl CodecError {
    /// `true` for [`CodecError::NotCompressible`].
    pub fn is_not_compressible(&self) -> bool {
        matches!(self, CodecError::NotCompressible(_))
    }
}
