//! Stream compression detection, decompression and re-encoding.
//!
//! Files stored in a ROM image (and inside NARC archives) are frequently wrapped in one of the
//! BIOS compression formats. Every such stream starts with a four byte header:
//!
//! | Offset (bytes) | Field             | Description                                              |
//! |----------------|-------------------|----------------------------------------------------------|
//! | 0x0000         | Tag               | 1 byte: compression type, see [`CompressionKind`]        |
//! | 0x0001         | Decompressed size | 3 bytes: little endian size of the decoded data          |
//! | 0x0004         | Extended size     | 4 bytes: only present when the 24-bit size is zero       |
//!
//! Boot binaries use the footer-driven [`blz`] variant instead, which has no header at all and
//! is never sniffed.

use std::borrow::Cow;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{instrument, warn};

use crate::error::{CorruptionError, Error, Result};
use crate::registry::{ResourceKind, TypeRegistry};

pub mod blz;
pub mod lz;
pub mod rle;

mod window;

/// Identifies the storage format of a compressed stream
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum CompressionKind {
    /// Not compressed
    #[default]
    None,

    /// Header followed by the stored data
    Copy,

    /// LZSS with 4-bit counts (`0x10`)
    Lz77,

    /// LZSS with extended counts (`0x11`)
    Lz11,

    /// Huffman coding (`0x2X`), recognised but not decoded
    Huffman,

    /// Run length encoding (`0x30`)
    Rle,

    /// LZSS variant (`0x40`), recognised but not decoded
    Lz40,

    /// Backwards LZ used for boot binaries and overlays
    Blz,
}

impl CompressionKind {
    /// Maps a header tag byte to the stream kind it announces
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(CompressionKind::Copy),
            0x10 => Some(CompressionKind::Lz77),
            0x11 => Some(CompressionKind::Lz11),
            0x20 | 0x24 | 0x28 => Some(CompressionKind::Huffman),
            0x30 => Some(CompressionKind::Rle),
            0x40 => Some(CompressionKind::Lz40),
            _ => None,
        }
    }

    /// Header tag byte written when encoding with this kind
    pub fn tag(&self) -> Option<u8> {
        match self {
            CompressionKind::Copy => Some(0x00),
            CompressionKind::Lz77 => Some(0x10),
            CompressionKind::Lz11 => Some(0x11),
            CompressionKind::Huffman => Some(0x28),
            CompressionKind::Rle => Some(0x30),
            CompressionKind::Lz40 => Some(0x40),
            CompressionKind::None | CompressionKind::Blz => None,
        }
    }

    /// Whether streams of this kind can be decoded
    pub fn is_supported(&self) -> bool {
        !matches!(self, CompressionKind::Huffman | CompressionKind::Lz40)
    }
}

/// Parsed header of a tagged stream
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct StreamHeader {
    pub tag: u8,
    pub size: usize,
    pub data_start: usize,
}

impl StreamHeader {
    pub fn read(input: &[u8]) -> Result<StreamHeader> {
        if input.len() < 4 {
            return Err(CorruptionError::UnexpectedEnd.into());
        }

        let word = LittleEndian::read_u32(input);
        let tag = (word & 0xFF) as u8;
        let size = (word >> 8) as usize;

        // The extended size field is not part of the plain copy format
        if size == 0 && tag != 0x00 && input.len() >= 8 {
            return Ok(StreamHeader {
                tag,
                size: LittleEndian::read_u32(&input[4..]) as usize,
                data_start: 8,
            });
        }

        Ok(StreamHeader {
            tag,
            size,
            data_start: 4,
        })
    }

    pub fn write(tag: u8, size: usize, out: &mut Vec<u8>) {
        if size > 0xFF_FFFF {
            out.extend_from_slice(&(tag as u32).to_le_bytes());
            out.extend_from_slice(&(size as u32).to_le_bytes());
        } else {
            out.extend_from_slice(&((size as u32) << 8 | tag as u32).to_le_bytes());
        }
    }
}

/// Guesses the compression applied to `input` from its first byte.
///
/// The tag is only trusted when the data is at least five bytes long and isn't recognised as a
/// structured resource on its own; anything else is reported as [`CompressionKind::None`].
pub fn sniff(input: &[u8]) -> CompressionKind {
    if input.len() < 5 {
        return CompressionKind::None;
    }

    let registry = TypeRegistry::global();
    if registry.kind(registry.identify(input)) != ResourceKind::Buffer {
        return CompressionKind::None;
    }

    match CompressionKind::from_tag(input[0]) {
        // A leading zero is far too common to trust without an exact size match
        Some(CompressionKind::Copy) => match StreamHeader::read(input) {
            Ok(header) if header.size == input.len() - 4 => CompressionKind::Copy,
            _ => CompressionKind::None,
        },
        Some(kind) => kind,
        None => CompressionKind::None,
    }
}

/// Reads the decoded size of `input` without decoding it.
///
/// Uncompressed data reports its own length.
pub fn decompressed_size(input: &[u8], kind: Option<CompressionKind>) -> usize {
    match kind.unwrap_or_else(|| sniff(input)) {
        CompressionKind::None => input.len(),
        CompressionKind::Blz => blz::decompressed_size(input).unwrap_or(input.len()),
        _ => StreamHeader::read(input)
            .map(|header| header.size)
            .unwrap_or(input.len()),
    }
}

/// Output of [`decompress`]
#[derive(Debug, Clone, PartialEq)]
pub struct Decompressed<'a> {
    /// Decoded bytes, borrowed from the input when nothing was decoded
    pub data: Cow<'a, [u8]>,

    /// Compression that was undone, [`CompressionKind::None`] when the input was kept
    pub kind: CompressionKind,
}

/// Decodes `input` if it looks compressed.
///
/// Some opaque files coincidentally start with a compression tag, so a stream that fails to
/// decode is returned unchanged instead of raising an error.
pub fn decompress(input: &[u8]) -> Decompressed<'_> {
    let kind = sniff(input);
    if kind == CompressionKind::None {
        return Decompressed {
            data: Cow::Borrowed(input),
            kind,
        };
    }

    match decompress_as(kind, input) {
        Ok(data) => Decompressed {
            data: Cow::Owned(data),
            kind,
        },
        Err(err) => {
            warn!(?kind, %err, "keeping data as stored");
            Decompressed {
                data: Cow::Borrowed(input),
                kind: CompressionKind::None,
            }
        }
    }
}

/// Decodes `input` when it is tagged as compressed, reporting any corruption
pub fn try_decompress(input: &[u8]) -> Result<Vec<u8>> {
    decompress_as(sniff(input), input)
}

/// Decodes `input` as a stream of the given kind
#[instrument(skip(input), fields(size = input.len()), err)]
pub fn decompress_as(kind: CompressionKind, input: &[u8]) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(input.to_vec()),
        CompressionKind::Copy => {
            let header = StreamHeader::read(input)?;
            input
                .get(header.data_start..header.data_start + header.size)
                .map(<[u8]>::to_vec)
                .ok_or(CorruptionError::UnexpectedEnd.into())
        }
        CompressionKind::Lz77 => lz::decompress_lz77(input),
        CompressionKind::Lz11 => lz::decompress_lz11(input),
        CompressionKind::Rle => rle::decompress(input),
        CompressionKind::Blz => blz::decompress(input),
        CompressionKind::Huffman | CompressionKind::Lz40 => {
            Err(Error::UnsupportedCompression(kind))
        }
    }
}

/// Encodes `input` with the given kind.
///
/// Encoding is greedy, the output always decodes back to `input` but is not guaranteed to match
/// the size of the original tool's output.
#[instrument(skip(input), fields(size = input.len()), err)]
pub fn compress(kind: CompressionKind, input: &[u8]) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(input.to_vec()),
        CompressionKind::Copy => {
            let mut out = Vec::with_capacity(input.len() + 4);
            out.extend_from_slice(&((input.len() as u32) << 8).to_le_bytes());
            out.extend_from_slice(input);
            Ok(out)
        }
        CompressionKind::Lz77 => Ok(lz::compress_lz77(input)),
        CompressionKind::Lz11 => Ok(lz::compress_lz11(input)),
        CompressionKind::Rle => Ok(rle::compress(input)),
        CompressionKind::Blz => Ok(blz::compress(input)),
        CompressionKind::Huffman | CompressionKind::Lz40 => {
            Err(Error::UnsupportedCompression(kind))
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::compression::{
        compress, decompress, decompress_as, decompressed_size, sniff, try_decompress,
        CompressionKind,
    };
    use crate::error::{Error, Result};

    #[traced_test]
    #[test]
    fn sniff_requires_five_bytes() {
        assert_eq!(sniff(&[0x10, 0x00, 0x00, 0x00]), CompressionKind::None);
        assert_eq!(
            sniff(&[0x10, 0x04, 0x00, 0x00, 0x00]),
            CompressionKind::Lz77
        );
    }

    #[traced_test]
    #[test]
    fn sniff_ignores_structured_resources() {
        #[rustfmt::skip]
        let narc = [
            b'N', b'A', b'R', b'C', 0xFE, 0xFF, 0x00, 0x01,
            0x1C, 0x00, 0x00, 0x00, 0x10, 0x00, 0x03, 0x00,
            b'B', b'T', b'A', b'F', 0x0C, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(sniff(&narc), CompressionKind::None);
    }

    #[traced_test]
    #[test]
    fn sniff_copy_needs_exact_size() {
        assert_eq!(
            sniff(&[0x00, 0x02, 0x00, 0x00, 0xAA, 0xBB]),
            CompressionKind::Copy
        );
        assert_eq!(
            sniff(&[0x00, 0x09, 0x00, 0x00, 0xAA, 0xBB]),
            CompressionKind::None
        );
    }

    #[traced_test]
    #[test]
    fn size_without_decoding() {
        assert_eq!(
            decompressed_size(&[0x10, 0x40, 0x00, 0x00, 0xFF], None),
            0x40
        );
        assert_eq!(
            decompressed_size(
                &[0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00],
                None
            ),
            0x0100_0000
        );
        assert_eq!(decompressed_size(b"plain data", None), 10);
    }

    #[traced_test]
    #[test]
    fn corrupt_stream_falls_back_to_input() {
        // Declares 0x40 bytes but the first token points before the output
        let input = [0x10, 0x40, 0x00, 0x00, 0x80, 0x00, 0x05];
        let result = decompress(&input);
        assert_eq!(result.kind, CompressionKind::None);
        assert_eq!(result.data.as_ref(), &input[..]);

        assert!(try_decompress(&input).is_err());
    }

    #[traced_test]
    #[test]
    fn huffman_is_not_decoded() {
        let input = [0x28, 0x10, 0x00, 0x00, 0x01, 0x02];
        assert_eq!(sniff(&input), CompressionKind::Huffman);
        assert!(matches!(
            decompress_as(CompressionKind::Huffman, &input),
            Err(Error::UnsupportedCompression(CompressionKind::Huffman))
        ));
        assert_eq!(decompress(&input).data.as_ref(), &input[..]);

        for tag in [0x20, 0x24, 0x28] {
            assert_eq!(
                CompressionKind::from_tag(tag),
                Some(CompressionKind::Huffman)
            );
        }
        assert_eq!(CompressionKind::from_tag(0x2C), None);
    }

    #[traced_test]
    #[test]
    fn copy_round_trip() -> Result<()> {
        let data = b"stored as is".to_vec();
        let packed = compress(CompressionKind::Copy, &data)?;
        assert_eq!(sniff(&packed), CompressionKind::Copy);
        assert_eq!(decompress(&packed).data.as_ref(), &data[..]);
        Ok(())
    }

    #[traced_test]
    #[test]
    fn decompress_borrows_plain_data() {
        let input = b"NOT COMPRESSED";
        let result = decompress(input);
        assert!(matches!(result.data, std::borrow::Cow::Borrowed(_)));
    }
}
