use crate::{CodecError, NotCompressibleReason, Result, Trailer, MAX_INPUT_LEN, MIN_INPUT_LEN, TRAILER_LEN};

/// Farthest a back-reference may reach.
const WINDOW: usize = 255;
/// Longest run a single back-reference encodes (`0xFF + 3`).
const MAX_RUN: usize = 258;
/// Shortest run worth a 3-byte back-reference.
const MIN_RUN: usize = 4;

/// Pick the escape byte: the least frequent byte value in `data`, lowest value on
/// ties. An absent value wins immediately.
pub fn find_flag_byte(data: &[u8]) -> u8 {
    let mut counts = [0usize; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }

    let mut flag = 0u8;
    let mut best = usize::MAX;
    for (value, &count) in counts.iter().enumerate() {
        if count < best {
            flag = value as u8;
            best = count;
            if count == 0 {
                break;
            }
        }
    }
    flag
}

/// Compress `input`, returning the payload followed by its [`Trailer`].
///
/// The result is always strictly shorter than the input. Inputs that cannot
/// shrink, or whose length is outside `MIN_INPUT_LEN..=MAX_INPUT_LEN`, fail with
/// [`CodecError::NotCompressible`].
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    let len = input.len();
    if len > MAX_INPUT_LEN {
        return Err(CodecError::NotCompressible(NotCompressibleReason::TooLarge(len)));
    }
    if len < MIN_INPUT_LEN {
        return Err(CodecError::NotCompressible(NotCompressibleReason::TooSmall(len)));
    }

    let flag = find_flag_byte(input);
    let no_gain = || CodecError::NotCompressible(NotCompressibleReason::NoGain);

    // Payload plus trailer must end up at least one byte shorter than the input.
    let mut work = vec![0u8; len - TRAILER_LEN - 1];
    // `work[free..]` holds emitted bytes; `input[..pending]` is still to encode.
    let mut free = work.len();
    let mut pending = len;

    while pending > 0 {
        let i = pending - 1;

        if free >= 3 {
            if let Some((run, distance)) = longest_match(input, i) {
                free -= 3;
                work[free + 2] = flag;
                work[free + 1] = distance;
                work[free] = (run - 3) as u8;
                pending -= run;
                continue;
            }
        }

        if free == 0 {
            return Err(no_gain());
        }
        free -= 1;
        work[free] = input[i];

        if input[i] == flag {
            if free == 0 {
                return Err(no_gain());
            }
            free -= 1;
            work[free] = 0;
        }
        pending -= 1;
    }

    let mut output = work.split_off(free);
    output.extend_from_slice(
        &Trailer {
            uncompressed_len: len as u32,
            flag,
        }
        .to_bytes(),
    );

    tracing::debug!(
        "Compressed {} bytes to {} ({}% of original)",
        len,
        output.len(),
        output.len() * 100 / len
    );

    Ok(output)
}

/// Longest earlier-in-scan match ending at `i`, searched over the bytes that
/// follow it within the window. Returns `(run, distance)` for runs of at least
/// [`MIN_RUN`]; the first candidate reaching [`MAX_RUN`] is taken immediately.
fn longest_match(input: &[u8], i: usize) -> Option<(usize, u8)> {
    let end = input.len().min(i + WINDOW + 1);

    let mut best_run = MIN_RUN - 1;
    let mut best_distance = 0usize;

    for j in i + 1..end {
        let mut run = 0usize;
        while run <= i && input[j - run] == input[i - run] {
            run += 1;
            if run == MAX_RUN {
                return Some((MAX_RUN, (j - i) as u8));
            }
        }
        if run > best_run {
            best_run = run;
            best_distance = j - i;
        }
    }

    (best_run >= MIN_RUN).then_some((best_run, best_distance as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_prefers_absent_byte() {
        assert_eq!(find_flag_byte(b"\x00\x01\x02\x04"), 3);
    }

    #[test]
    fn test_flag_tie_picks_lowest_value() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(find_flag_byte(&data), 0);
    }

    #[test]
    fn test_compress_run_of_equal_bytes() {
        let packed = compress(&[0x61; 20]).unwrap();
        assert_eq!(packed, [0x10, 0x01, 0x00, 0x61, 0x00, 0x00, 0x14, 0x00]);
    }

    #[test]
    fn test_compress_minimum_input() {
        let packed = compress(&[7; 9]).unwrap();
        assert_eq!(packed, [0x05, 0x01, 0x00, 0x07, 0x00, 0x00, 0x09, 0x00]);
    }

    #[test]
    fn test_compress_repeated_phrase() {
        let packed = compress(b"abcabcabcabcabcabc").unwrap();
        assert_eq!(
            packed,
            [0x0c, 0x03, 0x00, 0x61, 0x62, 0x63, 0x00, 0x00, 0x12, 0x00]
        );
    }

    #[test]
    fn test_compress_uses_absent_flag() {
        let packed = compress(b"hello hello hello hello world").unwrap();
        assert_eq!(
            packed,
            [
                0x0f, 0x06, 0x00, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x20, 0x77, 0x6f, 0x72, 0x6c, 0x64,
                0x00, 0x00, 0x1d, 0x00
            ]
        );
    }

    #[test]
    fn test_compress_long_run_splits_at_max() {
        let packed = compress(&[0x41; 300]).unwrap();
        assert_eq!(
            packed,
            [0x26, 0x01, 0x00, 0xff, 0x01, 0x00, 0x41, 0x00, 0x01, 0x2c, 0x00]
        );
    }

    #[test]
    fn test_compress_escapes_literal_flag() {
        let mut input: Vec<u8> = (0..=255u8).collect();
        for _ in 0..40 {
            input.extend_from_slice(b"xyz");
        }
        let packed = compress(&input).unwrap();
        assert_eq!(packed.len(), 267);
        // Byte 0 is the flag here, so the leading literal 0x00 is escaped.
        assert_eq!(&packed[..4], &[0x00, 0x00, 0x01, 0x02]);
        assert_eq!(&packed[packed.len() - 4..], &[0x00, 0x01, 0x78, 0x00]);
    }

    #[test]
    fn test_compress_rejects_small_input() {
        assert_eq!(
            compress(b"abcdefgh"),
            Err(CodecError::NotCompressible(NotCompressibleReason::TooSmall(8)))
        );
    }

    #[test]
    fn test_compress_rejects_incompressible_input() {
        assert_eq!(
            compress(b"abcdefghi"),
            Err(CodecError::NotCompressible(NotCompressibleReason::NoGain))
        );

        let mut noise: Vec<u8> = (0..=255u8).collect();
        noise.extend(0..=255u8);
        assert!(compress(&noise).unwrap_err().is_not_compressible());
    }

    #[test]
    fn test_compress_rejects_oversized_input() {
        let input = vec![0u8; MAX_INPUT_LEN + 1];
        assert_eq!(
            compress(&input),
            Err(CodecError::NotCompressible(NotCompressibleReason::TooLarge(
                MAX_INPUT_LEN + 1
            )))
        );
    }
}
