//! Backward LZ codec for KINGDOM archive entries.
//!
//! Compressed entries are produced by scanning the input from its last byte to its
//! first and writing output from the end of a work buffer toward its start. The
//! decoder mirrors this: it fills a pre-sized output buffer from the back, and
//! back-references copy from bytes that were already rebuilt above the cursor in
//! the *same* buffer, so no separate history window exists.
//!
//! A compressed blob ends with a 4-byte [`Trailer`]:
//!
//! ```text
//! [ payload ... ][ len (u24, big-endian) ][ flag ]
//! ```
//!
//! Inside the payload, every byte equal to `flag` starts an escape sequence when
//! read backward:
//!
//! - `flag, 0x00` is the literal flag byte.
//! - `flag, distance, run - 3` copies `run` bytes from `distance` bytes ahead.
//!
//! # Example
//!
//! ```
//! let input = b"hello hello hello hello world";
//! let packed = khp_codec::compress(input)?;
//! assert!(packed.len() < input.len());
//!
//! let unpacked = khp_codec::decompress(&packed, input.len())?;
//! assert_eq!(&unpacked[..], &input[..]);
//! # Ok::<(), khp_codec::CodecError>(())
//! ```

mod compress;
mod decompress;
mod error;
mod trailer;

pub use compress::{compress, find_flag_byte};
pub use decompress::{decompress, decompress_blob};
pub use error::{CodecError, NotCompressibleReason, Result};
pub use trailer::Trailer;

/// Largest input the 24-bit length field can describe.
pub const MAX_INPUT_LEN: usize = 0xFF_FFFF;

/// Smallest input that can shrink: nine equal bytes become one literal, one
/// back-reference and the trailer.
pub const MIN_INPUT_LEN: usize = 9;

/// Size of the trailer appended to every compressed blob.
pub const TRAILER_LEN: usize = 4;
