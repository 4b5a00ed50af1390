use crate::error::PatchError;
use crate::utils::{read_prefixed_bytes, write_prefixed_str};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Human-readable package information. None of it affects a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PatchMetadata {
    pub author: Option<String>,
    pub changelog: Vec<String>,
    pub credits: Vec<String>,
    pub notes: Option<String>,
}

impl PatchMetadata {
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// `true` when only the author would survive the classic layout.
    pub fn fits_classic(&self) -> bool {
        self.changelog.is_empty() && self.credits.is_empty() && self.notes.is_none()
    }

    /// Read the extended metadata block into `self`, keeping the author.
    ///
    /// `limit` is the number of bytes left in the package.
    pub(crate) fn read_extended<R: Read>(&mut self, reader: &mut R, limit: u64) -> Result<(), PatchError> {
        self.changelog = read_lines(reader, limit)?;
        self.credits = read_lines(reader, limit)?;
        self.notes = non_empty(read_string_lossy(reader, limit)?);
        Ok(())
    }

    pub(crate) fn write_extended<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_lines(writer, &self.changelog)?;
        write_lines(writer, &self.credits)?;
        write_prefixed_str(writer, self.notes.as_deref().unwrap_or_default())
    }
}

/// Decode an author string. Invalid UTF-8 is dropped with a warning.
pub(crate) fn decode_author(bytes: Vec<u8>) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(author) => non_empty(author),
        Err(e) => {
            tracing::warn!("Ignoring package author that is not valid UTF-8: {}", e);
            None
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn read_string_lossy<R: Read>(reader: &mut R, limit: u64) -> Result<String, PatchError> {
    let bytes = read_prefixed_bytes(reader, limit)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_lines<R: Read>(reader: &mut R, limit: u64) -> Result<Vec<String>, PatchError> {
    let count = reader.read_u32::<LE>()? as u64;
    // Every string needs at least its length byte.
    if count > limit {
        return Err(PatchError::CorruptTable(format!(
            "metadata claims {} lines with only {} bytes left",
            count, limit
        )));
    }
    (0..count).map(|_| read_string_lossy(reader, limit)).collect()
}

fn write_lines<W: Write>(writer: &mut W, lines: &[String]) -> io::Result<()> {
    writer.write_u32::<LE>(lines.len() as u32)?;
    for line in lines {
        write_prefixed_str(writer, line)?;
    }
    Ok(())
}
