//! Backwards LZ, the footer-driven format used for boot binaries and overlays.
//!
//! The file is decoded from its end towards its start, which allows the boot code to unpack
//! itself in place. A stored prefix is followed by the packed region, padding and an eight byte
//! footer:
//!
//! | Offset (from end) | Field            | Description                                              |
//! |-------------------|------------------|----------------------------------------------------------|
//! | -0x0008           | Encoded length   | 3 bytes: packed region, padding and footer               |
//! | -0x0005           | Header length    | 1 byte: padding and footer (8..=11)                      |
//! | -0x0004           | Increment        | 4 bytes: decoded size minus file size, 0 when not packed |
//!
//! The packed region is stored byte-reversed. Once flipped it reads like an LZ77 stream with
//! displacements offset by three instead of one.

use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian};

use crate::compression::window::{copy_back, next_byte, MatchFinder};
use crate::error::{CorruptionError, Result};

const FOOTER_SIZE: usize = 8;
const MAX_HEADER: usize = 0x0B;
const MIN_DISTANCE: usize = 3;
const MAX_DISTANCE: usize = 0x1002;
const MAX_LENGTH: usize = 18;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Footer {
    enc_len: usize,
    hdr_len: usize,
    inc_len: usize,
}

impl Footer {
    fn read(input: &[u8]) -> Result<Footer> {
        let len = input.len();
        if len < FOOTER_SIZE {
            return Err(CorruptionError::BadFooter("shorter than its footer").into());
        }

        let inc_len = LittleEndian::read_u32(&input[len - 4..]) as usize;
        let word = LittleEndian::read_u32(&input[len - 8..]);
        if inc_len == 0 {
            return Ok(Footer {
                enc_len: 0,
                hdr_len: 0,
                inc_len,
            });
        }

        let enc_len = (word & 0xFF_FFFF) as usize;
        let hdr_len = (word >> 24) as usize;
        if !(FOOTER_SIZE..=MAX_HEADER).contains(&hdr_len) {
            return Err(CorruptionError::BadFooter("header length out of range").into());
        }
        if enc_len < hdr_len || enc_len > len {
            return Err(CorruptionError::BadFooter("encoded length out of range").into());
        }
        // two packed bytes expand to at most MAX_LENGTH bytes
        if inc_len > (enc_len - hdr_len) * (MAX_LENGTH / 2) {
            return Err(CorruptionError::BadFooter("increment out of range").into());
        }

        Ok(Footer {
            enc_len,
            hdr_len,
            inc_len,
        })
    }

    fn is_packed(&self) -> bool {
        self.inc_len != 0
    }
}

/// Size of the decoded data, `None` when the footer is unusable
pub fn decompressed_size(input: &[u8]) -> Option<usize> {
    let footer = Footer::read(input).ok()?;
    if footer.is_packed() {
        Some(input.len() + footer.inc_len)
    } else {
        Some(input.len() - 4)
    }
}

/// Decodes a backwards LZ file.
///
/// Files whose increment is zero were never packed, they decode to everything before the last
/// four bytes.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let footer = Footer::read(input)?;
    if !footer.is_packed() {
        return Ok(input[..input.len() - 4].to_vec());
    }

    let dec_len = input.len() - footer.enc_len;
    let pak_len = footer.enc_len - footer.hdr_len;
    let raw_len = input.len() + footer.inc_len;

    let packed: Vec<u8> = input[dec_len..dec_len + pak_len]
        .iter()
        .rev()
        .copied()
        .collect();
    let mut reader = Cursor::new(packed.as_slice());

    let mut out = Vec::with_capacity(raw_len);
    out.extend_from_slice(&input[..dec_len]);

    'blocks: while out.len() < raw_len && (reader.position() as usize) < pak_len {
        let flags = next_byte(&mut reader)?;
        for bit in (0..8).rev() {
            if out.len() >= raw_len || reader.position() as usize >= pak_len {
                break 'blocks;
            }

            if flags & (1 << bit) == 0 {
                out.push(next_byte(&mut reader)?);
            } else {
                let b0 = next_byte(&mut reader)? as usize;
                let b1 = next_byte(&mut reader)? as usize;
                let token = b0 << 8 | b1;
                let count = (token >> 12) + 3;
                let distance = (token & 0xFFF) + MIN_DISTANCE;
                copy_back(&mut out, dec_len, distance, count, raw_len)?;
            }
        }
    }

    if out.len() != raw_len {
        return Err(CorruptionError::SizeMismatch {
            expected: raw_len,
            actual: out.len(),
        }
        .into());
    }

    out[dec_len..].reverse();
    Ok(out)
}

/// Encodes `input` as a backwards LZ file.
///
/// Input that doesn't shrink is stored with a zero footer, which [`decompress`] passes through.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let reversed: Vec<u8> = input.iter().rev().copied().collect();
    let mut finder = MatchFinder::new(&reversed, MIN_DISTANCE, MAX_DISTANCE, MAX_LENGTH);

    let mut stream = Vec::with_capacity(input.len() + input.len() / 8 + 1);
    let mut pos = 0;
    while pos < reversed.len() {
        let flag_index = stream.len();
        stream.push(0);

        for bit in (0..8).rev() {
            if pos >= reversed.len() {
                break;
            }

            match finder.longest(pos) {
                Some((length, distance)) => {
                    let disp = distance - MIN_DISTANCE;
                    stream.push(((length - 3) << 4 | disp >> 8) as u8);
                    stream.push((disp & 0xFF) as u8);
                    stream[flag_index] |= 1 << bit;
                    finder.insert_run(pos, length);
                    pos += length;
                }
                None => {
                    stream.push(reversed[pos]);
                    finder.insert(pos);
                    pos += 1;
                }
            }
        }
    }

    let padding = (4 - stream.len() % 4) % 4;
    let hdr_len = FOOTER_SIZE + padding;
    let enc_len = stream.len() + hdr_len;

    if enc_len >= input.len() {
        let mut out = Vec::with_capacity(input.len() + 4);
        out.extend_from_slice(input);
        out.extend_from_slice(&[0; 4]);
        return out;
    }

    let mut out = Vec::with_capacity(enc_len);
    out.extend(stream.iter().rev());
    out.resize(out.len() + padding, 0xFF);
    out.extend_from_slice(&(enc_len as u32 | (hdr_len as u32) << 24).to_le_bytes());
    out.extend_from_slice(&((input.len() - enc_len) as u32).to_le_bytes());
    out
}
