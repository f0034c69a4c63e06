//! Run length encoded streams (`0x30`).
//!
//! Each block starts with a control byte:
//!
//! - bit 7 set: the next byte is repeated `(ctrl & 0x7F) + 3` times
//! - bit 7 clear: the next `(ctrl & 0x7F) + 1` bytes are copied as they are

use std::io::Cursor;

use crate::compression::window::next_byte;
use crate::compression::StreamHeader;
use crate::error::{CorruptionError, Result};

const RLE_TAG: u8 = 0x30;
const MIN_RUN: usize = 3;
const MAX_RUN: usize = 0x7F + MIN_RUN;
const MAX_LITERALS: usize = 0x80;

/// Decodes a run length encoded stream including its header
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let header = StreamHeader::read(input)?;
    let size = header.size;
    let mut reader = Cursor::new(&input[header.data_start..]);
    let mut out = Vec::with_capacity(size.min(input.len().saturating_mul(MAX_RUN)));

    while out.len() < size {
        let ctrl = next_byte(&mut reader)?;
        let remaining = size - out.len();

        if ctrl & 0x80 != 0 {
            let count = ((ctrl & 0x7F) as usize + MIN_RUN).min(remaining);
            let value = next_byte(&mut reader)?;
            out.resize(out.len() + count, value);
        } else {
            let count = (ctrl as usize + 1).min(remaining);
            for _ in 0..count {
                out.push(next_byte(&mut reader)?);
            }
        }
    }

    if out.len() != size {
        return Err(CorruptionError::SizeMismatch {
            expected: size,
            actual: out.len(),
        }
        .into());
    }

    Ok(out)
}

fn run_length(input: &[u8], pos: usize) -> usize {
    input[pos..]
        .iter()
        .take(MAX_RUN)
        .take_while(|&&b| b == input[pos])
        .count()
}

fn flush_literals(out: &mut Vec<u8>, literals: &[u8]) {
    for chunk in literals.chunks(MAX_LITERALS) {
        out.push((chunk.len() - 1) as u8);
        out.extend_from_slice(chunk);
    }
}

/// Encodes `input` as a run length encoded stream
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / MAX_LITERALS + 8);
    StreamHeader::write(RLE_TAG, input.len(), &mut out);

    let mut literal_start = 0;
    let mut pos = 0;
    while pos < input.len() {
        let run = run_length(input, pos);
        if run < MIN_RUN {
            pos += 1;
            continue;
        }

        flush_literals(&mut out, &input[literal_start..pos]);
        out.push(0x80 | (run - MIN_RUN) as u8);
        out.push(input[pos]);
        pos += run;
        literal_start = pos;
    }
    flush_literals(&mut out, &input[literal_start..]);

    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::compression::rle::{compress, decompress};
    use crate::error::{CorruptionError, Error, Result};

    #[traced_test]
    #[test]
    fn decode_runs_and_literals() -> Result<()> {
        #[rustfmt::skip]
        let input = [
            0x30, 0x08, 0x00, 0x00,
            0x82, 0xAA,
            0x02, 0x01, 0x02, 0x03,
        ];
        assert_eq!(
            decompress(&input)?,
            vec![0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0x01, 0x02, 0x03]
        );
        Ok(())
    }

    #[traced_test]
    #[test]
    fn truncated_stream() {
        let input = [0x30, 0x08, 0x00, 0x00, 0x05, 0x01];
        assert!(matches!(
            decompress(&input),
            Err(Error::CorruptCompression(CorruptionError::UnexpectedEnd))
        ));
    }

    #[traced_test]
    #[test]
    fn round_trip_boundaries() -> Result<()> {
        for len in [0, 1, 3, 130, 131, 128, 129, 1000] {
            let run = vec![0x11u8; len];
            assert_eq!(decompress(&compress(&run))?, run, "run {len}");

            let literals: Vec<u8> = (0..len).map(|i| i as u8).collect();
            assert_eq!(decompress(&compress(&literals))?, literals, "literals {len}");
        }
        Ok(())
    }

    #[traced_test]
    #[test]
    fn maximum_run_is_one_block() {
        let packed = compress(&[7u8; 130]);
        assert_eq!(&packed[4..6], &[0xFF, 0x07]);
    }
}
