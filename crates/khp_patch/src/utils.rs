//! Length-prefixed strings.
//!
//! Strings are stored as a 7-bit variable-length byte count (low bits first, high
//! bit set on every byte but the last) followed by the UTF-8 bytes.

use crate::error::PatchError;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Longest encoding of a `u32` length.
const MAX_LENGTH_BYTES: usize = 5;

pub fn read_7bit_len<R: Read>(reader: &mut R) -> Result<u32, PatchError> {
    let mut value = 0u32;
    for index in 0..MAX_LENGTH_BYTES {
        let byte = reader.read_u8()?;
        value |= ((byte & 0x7F) as u32) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(PatchError::CorruptTable(
        "string length prefix is longer than 5 bytes".to_string(),
    ))
}

pub fn write_7bit_len<W: Write>(writer: &mut W, mut value: u32) -> io::Result<()> {
    while value >= 0x80 {
        writer.write_u8((value as u8) | 0x80)?;
        value >>= 7;
    }
    writer.write_u8(value as u8)
}

/// Read the raw bytes of a prefixed string. `limit` bounds the declared length so
/// a damaged prefix cannot trigger a huge allocation.
pub fn read_prefixed_bytes<R: Read>(reader: &mut R, limit: u64) -> Result<Vec<u8>, PatchError> {
    let len = read_7bit_len(reader)? as u64;
    if len > limit {
        return Err(PatchError::CorruptTable(format!(
            "string of {} bytes exceeds the {} bytes left in the package",
            len, limit
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

pub fn write_prefixed_str<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    write_7bit_len(writer, value.len() as u32)?;
    writer.write_all(value.as_bytes())
}
