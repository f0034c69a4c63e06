//! LZ77 (`0x10`) and LZ11 (`0x11`) streams.
//!
//! Both formats share the same framing: after the stream header, a flag byte announces the
//! next eight blocks, most significant bit first. A clear bit is one literal byte, a set bit is
//! a back-reference token copying earlier output.
//!
//! ## LZ77 token (2 bytes)
//! ```text
//! CCCC DDDD  DDDD DDDD     count = C + 3 (3..18), displacement = D + 1 (1..4096)
//! ```
//!
//! ## LZ11 tokens
//! The high nibble of the first byte selects the encoding:
//! ```text
//! 0000 CCCC  CCCC DDDD  DDDD DDDD              count = C + 0x11  (17..272)
//! 0001 CCCC  CCCC CCCC  CCCC DDDD  DDDD DDDD   count = C + 0x111 (273..65808)
//! CCCC DDDD  DDDD DDDD                         count = C + 1     (3..16)
//! ```
//! Every displacement is stored minus one.

use std::io::Cursor;

use crate::compression::window::{copy_back, next_byte, MatchFinder};
use crate::compression::StreamHeader;
use crate::error::{CorruptionError, Result};

const LZ77_TAG: u8 = 0x10;
const LZ11_TAG: u8 = 0x11;

const LZ77_MAX_LENGTH: usize = 18;
const LZ11_MAX_LENGTH: usize = 0x10110;
const MAX_DISTANCE: usize = 0x1000;

fn decode<F>(input: &[u8], mut token: F) -> Result<Vec<u8>>
where
    F: FnMut(&mut Cursor<&[u8]>) -> Result<(usize, usize)>,
{
    let header = StreamHeader::read(input)?;
    let size = header.size;
    let mut reader = Cursor::new(&input[header.data_start..]);
    let mut out = Vec::with_capacity(size.min(input.len().saturating_mul(16)));

    while out.len() < size {
        let flags = next_byte(&mut reader)?;
        for bit in (0..8).rev() {
            if out.len() >= size {
                break;
            }

            if flags & (1 << bit) == 0 {
                out.push(next_byte(&mut reader)?);
            } else {
                let (count, distance) = token(&mut reader)?;
                copy_back(&mut out, 0, distance, count, size)?;
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

/// Decodes an LZ77 stream including its header
pub fn decompress_lz77(input: &[u8]) -> Result<Vec<u8>> {
    decode(input, |reader| {
        let b0 = next_byte(reader)? as usize;
        let b1 = next_byte(reader)? as usize;
        Ok(((b0 >> 4) + 3, ((b0 & 0xF) << 8 | b1) + 1))
    })
}

/// Decodes an LZ11 stream including its header
pub fn decompress_lz11(input: &[u8]) -> Result<Vec<u8>> {
    decode(input, |reader| {
        let b0 = next_byte(reader)? as usize;
        match b0 >> 4 {
            0 => {
                let b1 = next_byte(reader)? as usize;
                let b2 = next_byte(reader)? as usize;
                Ok((
                    ((b0 & 0xF) << 4 | b1 >> 4) + 0x11,
                    ((b1 & 0xF) << 8 | b2) + 1,
                ))
            }
            1 => {
                let b1 = next_byte(reader)? as usize;
                let b2 = next_byte(reader)? as usize;
                let b3 = next_byte(reader)? as usize;
                Ok((
                    ((b0 & 0xF) << 12 | b1 << 4 | b2 >> 4) + 0x111,
                    ((b2 & 0xF) << 8 | b3) + 1,
                ))
            }
            count => {
                let b1 = next_byte(reader)? as usize;
                Ok((count + 1, ((b0 & 0xF) << 8 | b1) + 1))
            }
        }
    })
}

fn encode<F>(input: &[u8], tag: u8, mut finder: MatchFinder<'_>, mut token: F) -> Vec<u8>
where
    F: FnMut(&mut Vec<u8>, usize, usize),
{
    let mut out = Vec::with_capacity(input.len() + input.len() / 8 + 8);
    StreamHeader::write(tag, input.len(), &mut out);

    let mut pos = 0;
    while pos < input.len() {
        let flag_index = out.len();
        out.push(0);

        for bit in (0..8).rev() {
            if pos >= input.len() {
                break;
            }

            match finder.longest(pos) {
                Some((length, distance)) => {
                    token(&mut out, length, distance - 1);
                    out[flag_index] |= 1 << bit;
                    finder.insert_run(pos, length);
                    pos += length;
                }
                None => {
                    out.push(input[pos]);
                    finder.insert(pos);
                    pos += 1;
                }
            }
        }
    }

    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

/// Encodes `input` as an LZ77 stream.
///
/// A displacement of one is never produced, byte-wise copies from the directly preceding byte
/// can't be decoded into VRAM.
pub fn compress_lz77(input: &[u8]) -> Vec<u8> {
    let finder = MatchFinder::new(input, 2, MAX_DISTANCE, LZ77_MAX_LENGTH);
    encode(input, LZ77_TAG, finder, |out, length, disp| {
        out.push(((length - 3) << 4 | disp >> 8) as u8);
        out.push((disp & 0xFF) as u8);
    })
}

/// Encodes `input` as an LZ11 stream, picking the shortest count encoding per token
pub fn compress_lz11(input: &[u8]) -> Vec<u8> {
    let finder = MatchFinder::new(input, 1, MAX_DISTANCE, LZ11_MAX_LENGTH);
    encode(input, LZ11_TAG, finder, |out, length, disp| match length {
        0..=0x10 => {
            out.push(((length - 1) << 4 | disp >> 8) as u8);
            out.push((disp & 0xFF) as u8);
        }
        0x11..=0x110 => {
            let count = length - 0x11;
            out.push((count >> 4) as u8);
            out.push(((count & 0xF) << 4 | disp >> 8) as u8);
            out.push((disp & 0xFF) as u8);
        }
        _ => {
            let count = length - 0x111;
            out.push((0x10 | count >> 12) as u8);
            out.push(((count >> 4) & 0xFF) as u8);
            out.push(((count & 0xF) << 4 | disp >> 8) as u8);
            out.push((disp & 0xFF) as u8);
        }
    })
}
