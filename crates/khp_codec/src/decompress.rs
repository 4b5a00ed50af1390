use crate::{CodecError, Result, Trailer};

/// Decompress a blob produced by [`compress`](crate::compress) into exactly
/// `uncompressed_len` bytes.
///
/// The length comes from the caller (usually the archive record). The escape
/// byte is always taken from the trailer, and the trailer's own length field is
/// only checked for consistency.
pub fn decompress(blob: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
    let trailer = Trailer::read(blob).ok_or(CodecError::MissingTrailer(blob.len()))?;
    if trailer.uncompressed_len as usize != uncompressed_len {
        tracing::debug!(
            "Trailer length {} differs from requested length {}",
            trailer.uncompressed_len,
            uncompressed_len
        );
    }

    decode(payload_of(blob), trailer.flag, uncompressed_len)
}

/// Decompress a blob using the length stored in its trailer.
pub fn decompress_blob(blob: &[u8]) -> Result<Vec<u8>> {
    let trailer = Trailer::read(blob).ok_or(CodecError::MissingTrailer(blob.len()))?;
    decode(payload_of(blob), trailer.flag, trailer.uncompressed_len as usize)
}

fn payload_of(blob: &[u8]) -> &[u8] {
    &blob[..blob.len() - crate::TRAILER_LEN]
}

/// Reads a payload from its last byte toward its first.
struct BackwardReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BackwardReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: data.len(),
        }
    }

    fn next(&mut self, remaining: usize) -> Result<u8> {
        if self.pos == 0 {
            return Err(CodecError::Truncated { remaining });
        }
        self.pos -= 1;
        Ok(self.data[self.pos])
    }
}

fn decode(payload: &[u8], flag: u8, len: usize) -> Result<Vec<u8>> {
    let mut output = vec![0u8; len];
    let mut reader = BackwardReader::new(payload);
    // `output[cursor..]` is already rebuilt.
    let mut cursor = len;

    while cursor > 0 {
        let byte = reader.next(cursor)?;
        if byte != flag {
            cursor -= 1;
            output[cursor] = byte;
            continue;
        }

        let distance = reader.next(cursor)? as usize;
        if distance == 0 {
            cursor -= 1;
            output[cursor] = flag;
            continue;
        }

        let run = reader.next(cursor)? as usize + 3;
        if distance > len - cursor {
            return Err(CodecError::InvalidBackReference {
                distance,
                cursor,
                len,
            });
        }

        // Overlapping copies are intended: each byte may source one written
        // earlier in this same run.
        let mut source = cursor + distance;
        for _ in 0..run {
            if cursor == 0 {
                break;
            }
            cursor -= 1;
            source -= 1;
            output[cursor] = output[source];
        }
    }

    Ok(output)
}
