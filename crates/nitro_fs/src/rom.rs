//! ROM header, boot binaries and overlay tables.
//!
//! ## Header
//!
//! Only the fields needed to locate the file system and the boot code are interpreted:
//!
//! | Offset (bytes) | Field               | Description                                          |
//! |----------------|---------------------|------------------------------------------------------|
//! | 0x0000         | Title               | 12 bytes: ASCII game title                           |
//! | 0x000C         | Game code           | 4 bytes                                              |
//! | 0x0010         | Maker code          | 2 bytes                                              |
//! | 0x0020         | ARM9 binary         | 16 bytes: ROM offset, entry, RAM address, size       |
//! | 0x0030         | ARM7 binary         | 16 bytes: ROM offset, entry, RAM address, size       |
//! | 0x0040         | File name table     | 8 bytes: offset, size                                |
//! | 0x0048         | File alloc. table   | 8 bytes: offset, size                                |
//! | 0x0050         | ARM9 overlay table  | 8 bytes: offset, size                                |
//! | 0x0058         | ARM7 overlay table  | 8 bytes: offset, size                                |
//! | 0x015C         | Logo CRC            | 2 bytes                                              |
//! | 0x015E         | Header CRC          | 2 bytes: CRC-16/MODBUS of bytes 0x0000..0x015E       |
//!
//! ## Overlay table
//!
//! A run of 32 byte records, one per overlay, pointing at a file allocation table entry.

use std::borrow::Cow;
use std::io::Cursor;
use std::ops::Range;

use binrw::{BinRead, BinWrite};
use bon::Builder;
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::compression::{blz, CompressionKind};
use crate::error::{Error, Result};

/// Size of the ROM header
pub const HEADER_SIZE: usize = 0x160;

const CRC_RANGE: Range<usize> = 0..0x15E;

/// NitroSDK module parameter signature following `compressed_static_end`
const MODULE_MARKER: [u8; 8] = [0x21, 0x06, 0xC0, 0xDE, 0xDE, 0xC0, 0x06, 0x21];

/// Location and load address of a boot binary
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct BootBinary {
    pub rom_offset: u32,
    pub entry: u32,
    pub ram_address: u32,
    pub size: u32,
}

/// Offset and size of a table
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct TableRange {
    pub offset: u32,
    pub size: u32,
}

impl TableRange {
    /// Byte range of the table, `None` when it is empty
    pub fn range(&self) -> Option<Range<usize>> {
        let start = self.offset as usize;
        (self.size > 0).then(|| start..start + self.size as usize)
    }
}

/// ROM header
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct RomHeader {
    pub title: [u8; 12],
    pub game_code: [u8; 4],
    pub maker_code: [u8; 2],
    pub unit_code: u8,
    pub encryption_seed: u8,
    pub capacity: u8,
    pub reserved: [u8; 7],
    pub dsi_flags: u8,
    pub region: u8,
    pub version: u8,
    pub autostart: u8,
    pub arm9: BootBinary,
    pub arm7: BootBinary,
    pub fnt: TableRange,
    pub fat: TableRange,
    pub arm9_overlays: TableRange,
    pub arm7_overlays: TableRange,
    pub port_settings: [u32; 2],
    pub icon_offset: u32,
    pub secure_area_crc: u16,
    pub secure_area_delay: u16,
    pub arm9_autoload: u32,
    pub arm7_autoload: u32,
    pub secure_area_disable: u64,
    pub used_size: u32,
    pub header_size: u32,
    pub padding: [u8; 0x38],
    pub logo: [u8; 0x9C],
    pub logo_crc: u16,
    pub header_crc: u16,
}

impl Default for RomHeader {
    fn default() -> Self {
        Self {
            title: [0; 12],
            game_code: [0; 4],
            maker_code: [0; 2],
            unit_code: 0,
            encryption_seed: 0,
            capacity: 0,
            reserved: [0; 7],
            dsi_flags: 0,
            region: 0,
            version: 0,
            autostart: 0,
            arm9: BootBinary::default(),
            arm7: BootBinary::default(),
            fnt: TableRange::default(),
            fat: TableRange::default(),
            arm9_overlays: TableRange::default(),
            arm7_overlays: TableRange::default(),
            port_settings: [0; 2],
            icon_offset: 0,
            secure_area_crc: 0,
            secure_area_delay: 0,
            arm9_autoload: 0,
            arm7_autoload: 0,
            secure_area_disable: 0,
            used_size: 0,
            header_size: HEADER_SIZE as u32,
            padding: [0; 0x38],
            logo: [0; 0x9C],
            logo_crc: 0,
            header_crc: 0,
        }
    }
}

fn ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

impl RomHeader {
    /// Reads the header from the start of a ROM image
    pub fn parse(rom: &[u8]) -> Result<RomHeader> {
        if rom.len() < HEADER_SIZE {
            return Err(Error::malformed(format!(
                "{:#x} bytes are too short for a ROM header",
                rom.len()
            )));
        }
        Ok(RomHeader::read(&mut Cursor::new(rom))?)
    }

    /// Title without trailing padding
    pub fn title(&self) -> String {
        ascii(&self.title)
    }

    /// Game code as text
    pub fn game_code(&self) -> String {
        ascii(&self.game_code)
    }

    /// Maker code as text
    pub fn maker_code(&self) -> String {
        ascii(&self.maker_code)
    }

    /// Checksum of the header bytes of `rom`
    pub fn compute_crc(rom: &[u8]) -> u16 {
        crc::Crc::<u16>::new(&crc::CRC_16_MODBUS).checksum(&rom[CRC_RANGE])
    }

    /// Whether the stored header checksum matches the header bytes of `rom`
    pub fn verify_crc(&self, rom: &[u8]) -> bool {
        rom.len() >= HEADER_SIZE && Self::compute_crc(rom) == self.header_crc
    }
}

/// Byte ranges of a ROM image a [`FileSystem`](crate::FileSystem) is built from
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct RomLayout {
    /// File name table
    pub fnt: Range<usize>,

    /// File allocation table
    pub fat: Range<usize>,

    /// ARM9 boot binary
    pub arm9: Option<Range<usize>>,

    /// ARM7 boot binary
    pub arm7: Option<Range<usize>>,

    /// ARM9 overlay table
    pub arm9_overlay_table: Option<Range<usize>>,

    /// ARM7 overlay table
    pub arm7_overlay_table: Option<Range<usize>>,

    /// Start of the icon and title banner
    pub banner: Option<usize>,

    /// Load address of the ARM9 binary
    #[builder(default)]
    pub arm9_ram_address: u32,
}

impl RomLayout {
    /// Resolves the ranges a header points at, checking they lie within `rom_len` bytes
    pub fn from_header(header: &RomHeader, rom_len: usize) -> Result<RomLayout> {
        let check = |name: &str, range: Option<Range<usize>>| -> Result<Option<Range<usize>>> {
            match range {
                Some(range) if range.end > rom_len => Err(Error::malformed(format!(
                    "{name} {range:#x?} exceeds {rom_len:#x} bytes"
                ))),
                range => Ok(range),
            }
        };
        let binary = |binary: &BootBinary| TableRange {
            offset: binary.rom_offset,
            size: binary.size,
        };

        Ok(RomLayout {
            fnt: check("name table", header.fnt.range())?.unwrap_or_default(),
            fat: check("allocation table", header.fat.range())?.unwrap_or_default(),
            arm9: check("arm9", binary(&header.arm9).range())?,
            arm7: check("arm7", binary(&header.arm7).range())?,
            arm9_overlay_table: check("arm9 overlay table", header.arm9_overlays.range())?,
            arm7_overlay_table: check("arm7 overlay table", header.arm7_overlays.range())?,
            banner: match header.icon_offset as usize {
                0 => None,
                offset if offset >= rom_len => {
                    return Err(Error::malformed(format!(
                        "banner at {offset:#x} exceeds {rom_len:#x} bytes"
                    )))
                }
                offset => Some(offset),
            },
            arm9_ram_address: header.arm9.ram_address,
        })
    }

    /// Offsets at which a region other than a FAT file begins
    pub fn region_starts(&self) -> impl Iterator<Item = usize> + '_ {
        [
            Some(&self.fnt),
            Some(&self.fat),
            self.arm9.as_ref(),
            self.arm7.as_ref(),
            self.arm9_overlay_table.as_ref(),
            self.arm7_overlay_table.as_ref(),
        ]
        .into_iter()
        .flatten()
        .filter(|range| !range.is_empty())
        .map(|range| range.start)
        .chain(self.banner)
    }
}

/// CPU an overlay is loaded by
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Processor {
    Arm9,
    Arm7,
}

/// One overlay table record
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct OverlayEntry {
    pub id: u32,
    pub ram_address: u32,
    pub ram_size: u32,
    pub bss_size: u32,
    /// Start of the static initializer table
    pub sinit_start: u32,
    /// End of the static initializer table
    pub sinit_end: u32,
    /// File allocation table entry holding the overlay
    pub file_id: u32,
    /// Compressed size in the low 24 bits, flags in the top byte
    pub compressed: u32,
}

impl OverlayEntry {
    /// Size of a table record
    pub const SIZE: usize = 32;

    /// Whether the overlay file is backwards LZ compressed
    pub fn is_compressed(&self) -> bool {
        self.compressed & 0x0100_0000 != 0
    }

    /// Stored size of a compressed overlay
    pub fn compressed_size(&self) -> usize {
        (self.compressed & 0xFF_FFFF) as usize
    }
}

/// Reads every record of an overlay table
pub fn read_overlay_table(table: &[u8]) -> Result<Vec<OverlayEntry>> {
    if table.len() % OverlayEntry::SIZE != 0 {
        return Err(Error::malformed(format!(
            "overlay table of {:#x} bytes is not a multiple of {}",
            table.len(),
            OverlayEntry::SIZE
        )));
    }

    let mut reader = Cursor::new(table);
    (0..table.len() / OverlayEntry::SIZE)
        .map(|_| Ok(OverlayEntry::read(&mut reader)?))
        .collect()
}

fn find_marker(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(MODULE_MARKER.len())
        .position(|window| window == MODULE_MARKER)
        .filter(|&position| position >= 8)
}

/// Undoes the backwards LZ compression of an ARM9 binary.
///
/// The module parameters embedded in the binary give the end of the compressed part, relative to
/// `ram_address`. A zero end means the binary is stored decompressed, a binary without module
/// parameters is returned as is. The decoded binary has its end field cleared.
pub fn decompress_arm9(bytes: &[u8], ram_address: u32) -> Result<(Cow<'_, [u8]>, CompressionKind)> {
    let Some(marker) = find_marker(bytes) else {
        debug!("arm9 has no module parameters");
        return Ok((Cow::Borrowed(bytes), CompressionKind::None));
    };

    let static_end = LittleEndian::read_u32(&bytes[marker - 8..]);
    if static_end == 0 {
        return Ok((Cow::Borrowed(bytes), CompressionKind::None));
    }

    let end = static_end.wrapping_sub(ram_address) as usize;
    if end > bytes.len() || end < 8 {
        return Err(Error::malformed(format!(
            "compressed arm9 end {static_end:#x} outside of the binary loaded at {ram_address:#x}"
        )));
    }

    let mut out = blz::decompress(&bytes[..end])?;
    out.extend_from_slice(&bytes[end..]);
    match find_marker(&out) {
        Some(marker) => LittleEndian::write_u32(&mut out[marker - 8..], 0),
        None => warn!("module parameters lost while decompressing arm9"),
    }

    Ok((Cow::Owned(out), CompressionKind::Blz))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinWrite;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::compression::{blz, CompressionKind};
    use crate::error::{Error, Result};
    use crate::rom::{
        decompress_arm9, read_overlay_table, BootBinary, OverlayEntry, RomHeader, RomLayout,
        TableRange, HEADER_SIZE, MODULE_MARKER,
    };

    fn header_bytes(header: &RomHeader) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        header.write(&mut Cursor::new(&mut out))?;
        Ok(out)
    }

    #[traced_test]
    #[test]
    fn header_round_trip_and_crc() -> Result<()> {
        let mut header = RomHeader {
            arm9: BootBinary {
                rom_offset: 0x4000,
                entry: 0x0200_0800,
                ram_address: 0x0200_0000,
                size: 0x100,
            },
            fnt: TableRange {
                offset: 0x200,
                size: 0x20,
            },
            fat: TableRange {
                offset: 0x300,
                size: 0x10,
            },
            ..Default::default()
        };
        header.title[..4].copy_from_slice(b"TEST");
        header.game_code.copy_from_slice(b"ABCE");

        let mut bytes = header_bytes(&header)?;
        assert_eq!(bytes.len(), HEADER_SIZE);

        let crc = RomHeader::compute_crc(&bytes);
        bytes[0x15E..].copy_from_slice(&crc.to_le_bytes());

        let parsed = RomHeader::parse(&bytes)?;
        assert_eq!(parsed.title(), "TEST");
        assert_eq!(parsed.game_code(), "ABCE");
        assert_eq!(parsed.arm9.ram_address, 0x0200_0000);
        assert!(parsed.verify_crc(&bytes));

        bytes[0] = b'X';
        assert!(!parsed.verify_crc(&bytes));
        Ok(())
    }

    #[traced_test]
    #[test]
    fn layout_from_header() -> Result<()> {
        let header = RomHeader {
            fnt: TableRange {
                offset: 0x200,
                size: 0x20,
            },
            fat: TableRange {
                offset: 0x300,
                size: 0x10,
            },
            arm7: BootBinary {
                rom_offset: 0x400,
                size: 0x40,
                ..Default::default()
            },
            icon_offset: 0x800,
            ..Default::default()
        };

        let layout = RomLayout::from_header(&header, 0x1000)?;
        assert_eq!(layout.fnt, 0x200..0x220);
        assert_eq!(layout.fat, 0x300..0x310);
        assert_eq!(layout.arm9, None);
        assert_eq!(layout.arm7, Some(0x400..0x440));
        assert_eq!(layout.arm9_overlay_table, None);
        assert_eq!(layout.banner, Some(0x800));
        assert_eq!(
            layout.region_starts().collect::<Vec<_>>(),
            vec![0x200, 0x300, 0x400, 0x800]
        );

        assert!(matches!(
            RomLayout::from_header(&header, 0x300),
            Err(Error::MalformedContainer(_))
        ));
        Ok(())
    }

    #[traced_test]
    #[test]
    fn overlay_table() -> Result<()> {
        let entry = OverlayEntry {
            id: 1,
            ram_address: 0x0210_0000,
            file_id: 7,
            compressed: 0x0100_0123,
            ..Default::default()
        };
        let mut table = Vec::new();
        entry.write(&mut Cursor::new(&mut table))?;
        assert_eq!(table.len(), OverlayEntry::SIZE);

        let entries = read_overlay_table(&table)?;
        assert_eq!(entries, vec![entry]);
        assert!(entries[0].is_compressed());
        assert_eq!(entries[0].compressed_size(), 0x123);

        assert!(read_overlay_table(&table[..31]).is_err());
        Ok(())
    }

    fn arm9_image(static_end: u32) -> Vec<u8> {
        let mut image = vec![0xE1; 0x40];
        image.extend_from_slice(&static_end.to_le_bytes());
        image.extend_from_slice(&[0; 4]);
        image.extend_from_slice(&MODULE_MARKER);
        image
    }

    #[traced_test]
    #[test]
    fn arm9_without_compression() -> Result<()> {
        let image = arm9_image(0);
        let (data, kind) = decompress_arm9(&image, 0x0200_0000)?;
        assert_eq!(kind, CompressionKind::None);
        assert_eq!(data.as_ref(), &image[..]);

        let (data, kind) = decompress_arm9(b"no module parameters", 0)?;
        assert_eq!(kind, CompressionKind::None);
        assert_eq!(data.as_ref(), b"no module parameters");
        Ok(())
    }

    #[traced_test]
    #[test]
    fn arm9_blz_prefix() -> Result<()> {
        let code: Vec<u8> = b"\x00\x00\xA0\xE3\x1E\xFF\x2F\xE1".repeat(64);
        let packed = blz::compress(&code);
        let ram_address = 0x0200_0000u32;
        let static_end = ram_address + packed.len() as u32;

        let mut image = packed.clone();
        image.extend(arm9_image(static_end));

        let (data, kind) = decompress_arm9(&image, ram_address)?;
        assert_eq!(kind, CompressionKind::Blz);
        assert_eq!(&data[..code.len()], &code[..]);
        assert_eq!(&data[code.len()..code.len() + 0x40], &[0xE1; 0x40]);
        assert_eq!(&data[code.len() + 0x40..code.len() + 0x44], &[0; 4]);
        Ok(())
    }
}
