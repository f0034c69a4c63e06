//! Structural parsers for the resource framings.
//!
//! Every structured resource shares the same generic framing:
//!
//! | Offset (bytes) | Field          | Description                                        |
//! |----------------|----------------|----------------------------------------------------|
//! | 0x0000         | Magic number   | 4 bytes: resource tag, e.g. "RLCN" or "NARC"       |
//! | 0x0004         | Constant       | 4 bytes: byte order mark and version, 0x0100FEFF   |
//! | 0x0008         | Total size     | 4 bytes: size of the whole resource                |
//! | 0x000C         | Header size    | 2 bytes: offset of the first section               |
//! | 0x000E         | Section count  | 2 bytes: number of sections that follow            |
//!
//! Each section starts with its own tag and a size that includes the 8 byte section header.
//! Parsing never copies, a [`Resource`] only records where each part lives inside the bytes it
//! was parsed from.

use std::io::Cursor;
use std::ops::Range;

use binrw::BinRead;
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::registry::TypeRegistry;

const GENERIC_HEADER_SIZE: usize = 0x10;
const SECTION_HEADER_SIZE: usize = 0x08;

/// Generic resource header
#[derive(BinRead, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[br(little)]
pub struct GenericHeader {
    /// Resource tag
    pub magic: u32,

    /// Byte order mark and version
    pub constant: u32,

    /// Size of the whole resource in bytes
    pub total_size: u32,

    /// Offset of the first section
    pub header_size: u16,

    /// Number of sections following the header
    pub section_count: u16,
}

/// Header in front of every section
#[derive(BinRead, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[br(little)]
pub struct SectionHeader {
    /// Section tag
    pub magic: u32,

    /// Size of the section including this header
    pub size: u32,
}

/// Location of one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section tag as read
    pub magic: u32,

    /// Section contents after the section header
    pub payload: Range<usize>,
}

impl Section {
    /// Whether the section carries `tag` in either byte order
    pub fn is(&self, tag: &[u8; 4]) -> bool {
        let magic = u32::from_be_bytes(*tag);
        self.magic == magic || self.magic.swap_bytes() == magic
    }

    /// Tag of the section read as a little endian word
    pub fn tag(&self) -> String {
        TypeRegistry::tag_name(self.magic, false)
    }
}

/// Bits per pixel of palette indices
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BitDepth {
    /// 16 colors per palette
    Bpp4,

    /// 256 colors per palette
    Bpp8,
}

impl TryFrom<u32> for BitDepth {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            3 => Ok(BitDepth::Bpp4),
            4 => Ok(BitDepth::Bpp8),
            other => Err(Error::malformed(format!("unknown bit depth {other}"))),
        }
    }
}

/// Color palette
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub bit_depth: BitDepth,
    /// BGR555 color data
    pub colors: Range<usize>,
    pub sections: Vec<Section>,
}

/// Tile graphics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGraphics {
    /// Width in tiles, `0xFFFF` when the size is not fixed
    pub width: u16,
    /// Height in tiles, `0xFFFF` when the size is not fixed
    pub height: u16,
    pub bit_depth: BitDepth,
    /// Whether pixels are stored as 8x8 tiles instead of scanlines
    pub tiled: bool,
    pub pixels: Range<usize>,
    pub sections: Vec<Section>,
}

/// Screen map referencing tiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tilemap {
    /// Width in pixels
    pub width: u16,
    /// Height in pixels
    pub height: u16,
    pub entries: Range<usize>,
    pub sections: Vec<Section>,
}

/// Layout of a nested archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarcLayout {
    /// Number of files listed in the allocation table
    pub file_count: usize,
    /// `(begin, end)` pairs relative to [`NarcLayout::data`]
    pub allocation: Range<usize>,
    /// File name table
    pub names: Range<usize>,
    /// File image
    pub data: Range<usize>,
    pub sections: Vec<Section>,
}

impl NarcLayout {
    /// Offset of the allocation pair of file `index`
    pub fn entry_offset(&self, index: usize) -> usize {
        self.allocation.start + index * 8
    }

    /// Location of file `index` inside the archive bytes
    pub fn file_range(&self, bytes: &[u8], index: usize) -> Result<Range<usize>> {
        if index >= self.file_count {
            return Err(Error::malformed(format!(
                "file {index} outside of {} archived files",
                self.file_count
            )));
        }

        let entry = self.entry_offset(index);
        let begin = LittleEndian::read_u32(&bytes[entry..]) as usize;
        let end = LittleEndian::read_u32(&bytes[entry + 4..]) as usize;

        let range = self.data.start + begin..self.data.start + end;
        if begin > end || range.end > self.data.end {
            return Err(Error::malformed(format!(
                "file {index} spans {begin:#x}..{end:#x} outside of the archive data"
            )));
        }
        Ok(range)
    }

    /// Locations of every file, in allocation order
    pub fn file_ranges(&self, bytes: &[u8]) -> Result<Vec<Range<usize>>> {
        (0..self.file_count)
            .map(|index| self.file_range(bytes, index))
            .collect()
    }

    /// Bytes each file of `ranges` may grow to without overlapping the next file
    pub fn reserved_sizes(&self, ranges: &[Range<usize>]) -> Vec<usize> {
        let mut starts: Vec<usize> = ranges.iter().map(|range| range.start).collect();
        starts.sort_unstable();

        ranges
            .iter()
            .map(|range| {
                let next = starts.partition_point(|&start| start <= range.start);
                let limit = starts.get(next).copied().unwrap_or(self.data.end);
                limit.max(range.end) - range.start
            })
            .collect()
    }
}

/// A structurally parsed resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Resource {
    Palette(Palette),
    TileGraphics(TileGraphics),
    Tilemap(Tilemap),
    Archive(NarcLayout),
    /// Opaque data
    #[default]
    Buffer,
}

impl Resource {
    /// Sections of a structured resource, empty for opaque data
    pub fn sections(&self) -> &[Section] {
        match self {
            Resource::Palette(palette) => &palette.sections,
            Resource::TileGraphics(graphics) => &graphics.sections,
            Resource::Tilemap(map) => &map.sections,
            Resource::Archive(narc) => &narc.sections,
            Resource::Buffer => &[],
        }
    }

    /// Archive layout, when this is a nested archive
    pub fn as_archive(&self) -> Option<&NarcLayout> {
        match self {
            Resource::Archive(narc) => Some(narc),
            _ => None,
        }
    }
}

fn read_at<T>(bytes: &[u8], offset: usize, what: &str) -> Result<T>
where
    T: BinRead,
    for<'a> T::Args<'a>: Default,
{
    let tail = bytes
        .get(offset..)
        .ok_or_else(|| Error::malformed(format!("{what} starts past the end at {offset:#x}")))?;
    T::read_le(&mut Cursor::new(tail))
        .map_err(|err| Error::malformed(format!("{what} at {offset:#x}: {err}")))
}

/// Walks the generic header and the run of sections behind it
pub fn read_sections(bytes: &[u8]) -> Result<(GenericHeader, Vec<Section>)> {
    let header: GenericHeader = read_at(bytes, 0, "resource header")?;
    let header_size = header.header_size as usize;
    if header_size < GENERIC_HEADER_SIZE || header_size > bytes.len() {
        return Err(Error::malformed(format!(
            "header size {header_size:#x} outside of {:#x} bytes",
            bytes.len()
        )));
    }

    let mut sections = Vec::with_capacity(header.section_count as usize);
    let mut start = header_size;
    for index in 0..header.section_count {
        let section: SectionHeader = read_at(bytes, start, "section header")?;
        let size = section.size as usize;
        let end = start.checked_add(size).filter(|&end| end <= bytes.len());

        match end {
            Some(end) if size >= SECTION_HEADER_SIZE => {
                sections.push(Section {
                    magic: section.magic,
                    payload: start + SECTION_HEADER_SIZE..end,
                });
                start = end;
            }
            _ => {
                return Err(Error::malformed(format!(
                    "section {index} of size {size:#x} at {start:#x} exceeds {:#x} bytes",
                    bytes.len()
                )))
            }
        }
    }

    Ok((header, sections))
}

fn find(sections: &[Section], tag: &[u8; 4]) -> Result<Section> {
    sections
        .iter()
        .find(|section| section.is(tag))
        .cloned()
        .ok_or_else(|| {
            Error::malformed(format!("missing {} section", String::from_utf8_lossy(tag)))
        })
}

fn clamp(payload: &Range<usize>, offset: usize, size: usize) -> Range<usize> {
    let start = payload.start.saturating_add(offset).min(payload.end);
    let end = start.saturating_add(size).min(payload.end);
    start..end
}

#[derive(BinRead, Debug)]
#[br(little)]
struct PaletteFields {
    bit_depth: u32,
    _padding: u32,
    data_size: u32,
    data_offset: u32,
}

#[derive(BinRead, Debug)]
#[br(little)]
struct GraphicsFields {
    height: u16,
    width: u16,
    bit_depth: u32,
    _mapping: u32,
    tiled: u32,
    data_size: u32,
    data_offset: u32,
}

#[derive(BinRead, Debug)]
#[br(little)]
struct ScreenFields {
    width: u16,
    height: u16,
    _format: u32,
    data_size: u32,
}

pub(crate) fn parse_palette(bytes: &[u8]) -> Result<Resource> {
    let (_, sections) = read_sections(bytes)?;
    let pltt = find(&sections, b"PLTT")?;
    let fields: PaletteFields = read_at(bytes, pltt.payload.start, "PLTT")?;

    Ok(Resource::Palette(Palette {
        bit_depth: fields.bit_depth.try_into()?,
        colors: clamp(
            &pltt.payload,
            fields.data_offset as usize,
            fields.data_size as usize,
        ),
        sections,
    }))
}

pub(crate) fn parse_tile_graphics(bytes: &[u8]) -> Result<Resource> {
    let (_, sections) = read_sections(bytes)?;
    let chars = find(&sections, b"CHAR")?;
    let fields: GraphicsFields = read_at(bytes, chars.payload.start, "CHAR")?;

    Ok(Resource::TileGraphics(TileGraphics {
        width: fields.width,
        height: fields.height,
        bit_depth: fields.bit_depth.try_into()?,
        tiled: fields.tiled == 0,
        pixels: clamp(
            &chars.payload,
            fields.data_offset as usize,
            fields.data_size as usize,
        ),
        sections,
    }))
}

pub(crate) fn parse_tilemap(bytes: &[u8]) -> Result<Resource> {
    let (_, sections) = read_sections(bytes)?;
    let scrn = find(&sections, b"SCRN")?;
    let fields: ScreenFields = read_at(bytes, scrn.payload.start, "SCRN")?;

    Ok(Resource::Tilemap(Tilemap {
        width: fields.width,
        height: fields.height,
        entries: clamp(&scrn.payload, 12, fields.data_size as usize),
        sections,
    }))
}

pub(crate) fn parse_archive(bytes: &[u8]) -> Result<Resource> {
    let (_, sections) = read_sections(bytes)?;
    let btaf = find(&sections, b"BTAF")?;
    let btnf = find(&sections, b"BTNF")?;
    let gmif = find(&sections, b"GMIF")?;

    let file_count: u16 = read_at(bytes, btaf.payload.start, "BTAF")?;
    let file_count = file_count as usize;
    let allocation = btaf.payload.start + 4..btaf.payload.start + 4 + file_count * 8;
    if allocation.end > btaf.payload.end {
        return Err(Error::malformed(format!(
            "{file_count} allocation entries don't fit into {:#x} bytes",
            btaf.payload.len()
        )));
    }

    Ok(Resource::Archive(NarcLayout {
        file_count,
        allocation,
        names: btnf.payload,
        data: gmif.payload,
        sections,
    }))
}

pub(crate) fn parse_buffer(_bytes: &[u8]) -> Result<Resource> {
    Ok(Resource::Buffer)
}
